//! Serialization benchmarks
//!
//! Measures the per-tick hot path without network I/O: channel snapshot,
//! TDATA encoding, and decoding on the client side.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use igtl_tracking_server::config::DeviceSet;
use igtl_tracking_server::protocol::{
    message::IgtlMessage,
    types::TDataMessage,
    update::{decode_update, encode_update},
};
use igtl_tracking_server::tracking::{ChannelMultiplexer, Matrix4, ToolSourceRegistry, TransformEngine};
use std::sync::Arc;

/// `tools` tools tracked relative to a reference tool, all in one channel
fn setup(tools: usize) -> ChannelMultiplexer {
    let mut toml = String::from(
        "[device]\nid = \"Tracker\"\nhost = \"localhost\"\nport = 8765\n\n[[tools]]\nid = \"Ref\"\n",
    );
    let mut ids = vec!["\"Ref\"".to_string()];
    for i in 0..tools {
        toml.push_str(&format!("\n[[tools]]\nid = \"T{}\"\nreference_frame = \"Ref\"\n", i));
        ids.push(format!("\"T{}\"", i));
    }
    toml.push_str(&format!("\n[[channels]]\nid = \"Main\"\ntools = [{}]\n", ids.join(", ")));

    let device_set = Arc::new(DeviceSet::from_toml_str(&toml).unwrap());
    let registry = Arc::new(ToolSourceRegistry::new(&device_set));
    registry.update("Ref", Matrix4::translation(0.0, 0.0, -100.0), true, 1.0).unwrap();
    for i in 0..tools {
        let pose = Matrix4::rotation_z(i as f64 * 0.1, i as f64, 2.0 * i as f64, 50.0);
        registry.update(&format!("T{}", i), pose, true, 1.0).unwrap();
    }
    ChannelMultiplexer::new(Arc::new(TransformEngine::new(device_set, registry)))
}

fn bench_snapshot_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_to_tdata");
    for tools in [1usize, 4, 16] {
        let multiplexer = setup(tools);
        group.bench_with_input(BenchmarkId::from_parameter(tools), &multiplexer, |b, multiplexer| {
            b.iter(|| {
                let snapshot = multiplexer.snapshot("Main").unwrap();
                let encoded = encode_update("Main", &snapshot).unwrap().encode().unwrap();
                black_box(encoded)
            });
        });
    }
    group.finish();
}

fn bench_tdata_decode(c: &mut Criterion) {
    let multiplexer = setup(16);
    let snapshot = multiplexer.snapshot("Main").unwrap();
    let encoded = encode_update("Main", &snapshot).unwrap().encode().unwrap();

    c.bench_function("tdata_17_tools_decode", |b| {
        b.iter(|| {
            let msg = IgtlMessage::<TDataMessage>::decode(black_box(&encoded)).unwrap();
            black_box(decode_update(&msg.content))
        });
    });
}

criterion_group!(benches, bench_snapshot_encode, bench_tdata_decode);

criterion_main!(benches);
