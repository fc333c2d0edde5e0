//! Parameter sets
//!
//! A [`ParameterSet`] is the ordered collection of a model's trainable arrays,
//! one [`LayerArray`] per layer. Values are held in f64 regardless of the
//! precision a model trains in, so that every client hands the aggregator
//! numerically comparable data.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of elements implied by a shape. A rank-0 shape holds one element.
///
/// Returns `None` on overflow.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// One trainable array: a shape and its row-major f64 values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerArray {
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl LayerArray {
    /// Create a layer, checking that `values` fills `shape` exactly
    pub fn new(shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let expected = element_count(&shape).ok_or(Error::ShapeMismatch {
            expected: usize::MAX,
            got: values.len(),
        })?;
        if expected != values.len() {
            return Err(Error::ShapeMismatch {
                expected,
                got: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    /// Widen f32 values to f64. Every f32 is exactly representable as f64.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self> {
        Self::new(shape, values.iter().map(|&v| f64::from(v)).collect())
    }

    /// A zero-filled layer of the given shape
    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let n = element_count(&shape).ok_or(Error::InvalidData("shape overflows usize"))?;
        Self::new(shape, alloc::vec![0.0; n])
    }

    /// Layer shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the layer holds no elements
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Narrow the values to f32 for a model that trains in single precision
    pub fn to_f32(&self) -> Vec<f32> {
        self.values.iter().map(|&v| v as f32).collect()
    }

    /// Split into shape and values
    pub fn into_parts(self) -> (Vec<usize>, Vec<f64>) {
        (self.shape, self.values)
    }
}

/// Ordered parameter arrays of a model, one per trainable layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    layers: Vec<LayerArray>,
}

impl ParameterSet {
    /// Create a parameter set from its layers, in model order
    pub fn new(layers: Vec<LayerArray>) -> Self {
        Self { layers }
    }

    /// Build from `(shape, f32 values)` pairs, normalizing to f64
    pub fn from_f32<'a, I>(layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Vec<usize>, &'a [f32])>,
    {
        layers
            .into_iter()
            .map(|(shape, values)| LayerArray::from_f32(shape, values))
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }

    /// Layers in model order
    pub fn layers(&self) -> &[LayerArray] {
        &self.layers
    }

    /// Iterate over layers in model order
    pub fn iter(&self) -> core::slice::Iter<'_, LayerArray> {
        self.layers.iter()
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the set holds no layers
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Total number of scalar parameters across all layers
    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(LayerArray::len).sum()
    }

    /// Shapes of all layers, in model order
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.layers.iter().map(|l| l.shape.clone()).collect()
    }

    /// Check the set against an architecture's layer shapes
    pub fn check_layout(&self, layout: &[Vec<usize>]) -> Result<()> {
        if self.layers.len() != layout.len() {
            return Err(Error::LayerCountMismatch {
                expected: layout.len(),
                got: self.layers.len(),
            });
        }
        for (layer, shape) in self.layers.iter().zip(layout) {
            if layer.shape != *shape {
                return Err(Error::ShapeMismatch {
                    expected: element_count(shape).unwrap_or(usize::MAX),
                    got: layer.len(),
                });
            }
        }
        Ok(())
    }

    /// Consume into the layer list
    pub fn into_layers(self) -> Vec<LayerArray> {
        self.layers
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = &'a LayerArray;
    type IntoIter = core::slice::Iter<'a, LayerArray>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_layer_rejects_short_values() {
        let err = LayerArray::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert_eq!(
            err,
            Error::ShapeMismatch {
                expected: 6,
                got: 5
            }
        );
    }

    #[test]
    fn test_scalar_layer_holds_one_value() {
        let layer = LayerArray::new(vec![], vec![4.5]).unwrap();
        assert_eq!(layer.len(), 1);
        assert!(LayerArray::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_from_f32_widens_exactly() {
        let raw = [0.1f32, -3.25, f32::MIN_POSITIVE];
        let set = ParameterSet::from_f32([(vec![3], &raw[..])]).unwrap();
        let layer = &set.layers()[0];
        for (wide, narrow) in layer.values().iter().zip(raw) {
            assert_eq!(*wide as f32, narrow);
        }
        assert_eq!(layer.to_f32(), raw.to_vec());
    }

    #[test]
    fn test_check_layout() {
        let set = ParameterSet::new(vec![
            LayerArray::zeros(vec![4, 2]).unwrap(),
            LayerArray::zeros(vec![2]).unwrap(),
        ]);
        assert_eq!(set.num_parameters(), 10);
        assert!(set.check_layout(&[vec![4, 2], vec![2]]).is_ok());
        assert!(matches!(
            set.check_layout(&[vec![4, 2]]),
            Err(Error::LayerCountMismatch {
                expected: 1,
                got: 2
            })
        ));
        assert!(matches!(
            set.check_layout(&[vec![2, 4], vec![3]]),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
