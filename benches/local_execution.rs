//! Benchmark suite for local execution and wire encoding
//!
//! Measures session run latency on the CPU provider and the cost of
//! encoding/decoding Triton tensors.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stratus::cloud::triton::TritonTensor;
use stratus::model_loader::load_model_from_bytes;
use stratus::testing::{cloud_scenarios, OnnxModelBuilder};
use stratus::{ElementType, InferenceSession, SessionOptions, Tensor, Value};

fn benchmark_scenarios(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenario_run");

    for s in cloud_scenarios() {
        let model = load_model_from_bytes(&s.model_builder().to_bytes()).unwrap();
        let session = InferenceSession::from_model(model, SessionOptions::new()).unwrap();
        let inputs = s.inputs();
        group.bench_function(s.model, |b| {
            b.iter(|| {
                let out = session.run(None, black_box(&inputs), None).unwrap();
                black_box(out)
            });
        });
    }

    group.finish();
}

fn benchmark_add_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_f32");

    for len in [4usize, 256, 4096, 65536].iter() {
        let model =
            load_model_from_bytes(&OnnxModelBuilder::binary("Add", ElementType::Float, *len).to_bytes())
                .unwrap();
        let session = InferenceSession::from_model(model, SessionOptions::new()).unwrap();
        let x = Value::from(Tensor::vector((0..*len).map(|i| i as f32).collect()));
        let inputs = [("X", x.clone()), ("Y", x)];

        group.bench_with_input(BenchmarkId::from_parameter(len), len, |b, _| {
            b.iter(|| {
                let out = session.run(None, black_box(&inputs), None).unwrap();
                black_box(out)
            });
        });
    }

    group.finish();
}

fn benchmark_wire_codec(c: &mut Criterion) {
    let value = Value::from(Tensor::vector((0..4096).map(|i| i as f32).collect()));

    c.bench_function("triton_encode_4096", |b| {
        b.iter(|| {
            let tensor = TritonTensor::from_value("X", black_box(&value));
            black_box(serde_json::to_vec(&tensor).unwrap())
        });
    });

    let body = serde_json::to_vec(&TritonTensor::from_value("Z", &value)).unwrap();
    c.bench_function("triton_decode_4096", |b| {
        b.iter(|| {
            let tensor: TritonTensor = serde_json::from_slice(black_box(&body)).unwrap();
            black_box(tensor.to_value().unwrap())
        });
    });
}

criterion_group!(
    benches,
    benchmark_scenarios,
    benchmark_add_sizes,
    benchmark_wire_codec
);
criterion_main!(benches);
