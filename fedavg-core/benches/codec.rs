use criterion::{black_box, criterion_group, criterion_main, Criterion};

use fedavg_core::codec::ParameterCodec;
use fedavg_core::params::{LayerArray, ParameterSet};

fn mnist_sized_set() -> ParameterSet {
    // 784 -> 128 -> 10 dense network
    let shapes = [vec![784, 128], vec![128], vec![128, 10], vec![10]];
    let layers = shapes
        .iter()
        .map(|shape| {
            let n: usize = shape.iter().product();
            let values = (0..n).map(|i| (i as f64).sin()).collect();
            LayerArray::new(shape.clone(), values).unwrap()
        })
        .collect();
    ParameterSet::new(layers)
}

fn bench_codec(c: &mut Criterion) {
    let params = mnist_sized_set();
    let codec = ParameterCodec::new().with_layout(params.shapes());
    let bytes = codec.encode(&params).unwrap();

    c.bench_function("encode_mlp_101k", |b| {
        b.iter(|| codec.encode(black_box(&params)).unwrap())
    });
    c.bench_function("decode_mlp_101k", |b| {
        b.iter(|| codec.decode(black_box(&bytes)).unwrap())
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
