//! Parameter wire codec
//!
//! Encodes a [`ParameterSet`] into the payload exchanged with the aggregator
//! and decodes it back.
//!
//! Layout (postcard framing):
//!
//! ```text
//! version: u8 | layer_count: varint | layers: varint len, then per layer
//!     shape: varint len + varint dims | values: varint len + f64 LE each
//! ```
//!
//! `layer_count` duplicates the sequence length on purpose: a decoder that sees
//! the two disagree knows the header was corrupted. Values are always IEEE-754
//! doubles, so `decode(encode(p)) == p` bit for bit.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::params::{element_count, LayerArray, ParameterSet};

/// Current wire format version
pub const FORMAT_VERSION: u8 = 1;

#[derive(Serialize)]
struct WireParametersRef<'a> {
    version: u8,
    layer_count: u32,
    layers: Vec<WireLayerRef<'a>>,
}

#[derive(Serialize)]
struct WireLayerRef<'a> {
    shape: Vec<u64>,
    values: &'a [f64],
}

#[derive(Deserialize)]
struct WireParameters {
    version: u8,
    layer_count: u32,
    layers: Vec<WireLayer>,
}

#[derive(Deserialize)]
struct WireLayer {
    shape: Vec<u64>,
    values: Vec<f64>,
}

/// Error encoding a parameter set
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// More layers than the `u32` layer count can declare
    TooManyLayers(usize),
    /// Serializer failure
    Serialize(postcard::Error),
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

impl core::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EncodeError::TooManyLayers(n) => write!(f, "{n} layers exceed the wire layer count"),
            EncodeError::Serialize(e) => write!(f, "could not serialize parameters: {e}"),
        }
    }
}

impl From<postcard::Error> for EncodeError {
    fn from(e: postcard::Error) -> Self {
        EncodeError::Serialize(e)
    }
}

fn wire_layer_count(layers: usize) -> Result<u32, EncodeError> {
    u32::try_from(layers).map_err(|_| EncodeError::TooManyLayers(layers))
}

/// Error decoding a parameter payload
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload is truncated or a length header is corrupted
    Malformed(postcard::Error),
    /// Payload was written by an unknown format version
    UnsupportedVersion(u8),
    /// Declared layer count disagrees with the layers present
    LayerCountMismatch {
        /// Count from the header
        declared: usize,
        /// Layers actually present
        found: usize,
    },
    /// A layer's values do not fill its shape
    ShapeMismatch {
        /// Zero-based layer index
        layer: usize,
        /// Elements implied by the shape
        expected: usize,
        /// Values present
        found: usize,
    },
    /// A dimension does not fit in this platform's `usize`
    DimensionOverflow {
        /// Zero-based layer index
        layer: usize,
    },
    /// Payload decoded but does not match the expected architecture
    LayoutMismatch {
        /// Zero-based layer index of the first mismatch (or the layer count
        /// when the set is too short)
        layer: usize,
    },
    /// Bytes remain after the parameter set
    TrailingBytes(usize),
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::Malformed(e) => write!(f, "malformed parameter payload: {e}"),
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported format version {v}"),
            DecodeError::LayerCountMismatch { declared, found } => {
                write!(f, "header declares {declared} layers, payload holds {found}")
            }
            DecodeError::ShapeMismatch {
                layer,
                expected,
                found,
            } => write!(
                f,
                "layer {layer}: shape implies {expected} values, payload holds {found}"
            ),
            DecodeError::DimensionOverflow { layer } => {
                write!(f, "layer {layer}: dimension overflows usize")
            }
            DecodeError::LayoutMismatch { layer } => {
                write!(f, "layer {layer} does not match the model architecture")
            }
            DecodeError::TrailingBytes(n) => write!(f, "{n} trailing bytes after parameters"),
        }
    }
}

impl From<postcard::Error> for DecodeError {
    fn from(e: postcard::Error) -> Self {
        DecodeError::Malformed(e)
    }
}

/// Encoder/decoder for parameter payloads
///
/// Without a layout any structurally valid payload decodes. With a layout
/// (the model's layer shapes) decode also rejects payloads for a different
/// architecture.
#[derive(Debug, Clone, Default)]
pub struct ParameterCodec {
    layout: Option<Vec<Vec<usize>>>,
}

impl ParameterCodec {
    /// Codec that accepts any well-formed parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Require decoded sets to have exactly these layer shapes
    pub fn with_layout(mut self, layout: Vec<Vec<usize>>) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Expected layout, if any
    pub fn layout(&self) -> Option<&[Vec<usize>]> {
        self.layout.as_deref()
    }

    /// Serialize a parameter set to bytes
    pub fn encode(&self, params: &ParameterSet) -> Result<Vec<u8>, EncodeError> {
        let layers = params
            .iter()
            .map(|layer| WireLayerRef {
                shape: layer.shape().iter().map(|&d| d as u64).collect(),
                values: layer.values(),
            })
            .collect::<Vec<_>>();
        let layer_count = wire_layer_count(layers.len())?;

        Ok(postcard::to_allocvec(&WireParametersRef {
            version: FORMAT_VERSION,
            layer_count,
            layers,
        })?)
    }

    /// Deserialize a parameter set from bytes
    pub fn decode(&self, bytes: &[u8]) -> Result<ParameterSet, DecodeError> {
        let (wire, rest) = postcard::take_from_bytes::<WireParameters>(bytes)?;
        if !rest.is_empty() {
            return Err(DecodeError::TrailingBytes(rest.len()));
        }
        if wire.version != FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion(wire.version));
        }
        if wire.layer_count as usize != wire.layers.len() {
            return Err(DecodeError::LayerCountMismatch {
                declared: wire.layer_count as usize,
                found: wire.layers.len(),
            });
        }

        let mut layers = Vec::with_capacity(wire.layers.len());
        for (index, layer) in wire.layers.into_iter().enumerate() {
            let shape = layer
                .shape
                .iter()
                .map(|&d| usize::try_from(d))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| DecodeError::DimensionOverflow { layer: index })?;
            let expected =
                element_count(&shape).ok_or(DecodeError::DimensionOverflow { layer: index })?;
            let found = layer.values.len();
            let array = LayerArray::new(shape, layer.values).map_err(|_| {
                DecodeError::ShapeMismatch {
                    layer: index,
                    expected,
                    found,
                }
            })?;
            layers.push(array);
        }
        let params = ParameterSet::new(layers);

        if let Some(layout) = &self.layout {
            if let Some(layer) = first_layout_mismatch(&params, layout) {
                return Err(DecodeError::LayoutMismatch { layer });
            }
        }

        Ok(params)
    }
}

fn first_layout_mismatch(params: &ParameterSet, layout: &[Vec<usize>]) -> Option<usize> {
    let shared = params.len().min(layout.len());
    (0..shared)
        .find(|&i| params.layers()[i].shape() != layout[i].as_slice())
        .or_else(|| (params.len() != layout.len()).then_some(shared))
}

/// Encode with a layout-agnostic codec
pub fn encode(params: &ParameterSet) -> Result<Vec<u8>, EncodeError> {
    ParameterCodec::new().encode(params)
}

/// Decode with a layout-agnostic codec
pub fn decode(bytes: &[u8]) -> Result<ParameterSet, DecodeError> {
    ParameterCodec::new().decode(bytes)
}
