//! Criterion benchmarks for the keymap wire codecs.
//!
//! Covers the per-report hot path (KEY_DATA decode through the binding codec)
//! and the full-keymap `READ_KEYMAP` response at a few grid sizes.
//!
//! Run with:
//! ```bash
//! cargo bench --package keymap-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keymap_core::protocol::frame::{encode_keymap_response, CommandFrame, KeymapPayload};
use keymap_core::protocol::report::{KeyDataReport, KeySelectReport};
use keymap_core::{BehaviorRegistry, BindingCodec, GridDimensions, KeyRecord};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_payload(layers: u8, keys: u8) -> KeymapPayload {
    let dimensions = GridDimensions::new(layers, keys).expect("valid bench grid");
    let records = (0..dimensions.cell_count())
        .map(|i| KeyRecord::new((i % 33) as u32, i as u32, 0))
        .collect();
    KeymapPayload {
        dimensions,
        records,
    }
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// KEY_SELECT + KEY_DATA decode, then record → binding → record.
fn bench_report_hot_path(c: &mut Criterion) {
    let registry = BehaviorRegistry::builtin();
    let codec = BindingCodec::new(&registry);
    let select = KeySelectReport {
        layer_index: 1,
        key_index: 7,
    }
    .encode();
    let data = KeyDataReport {
        record: KeyRecord::new(8, 2, 0),
    }
    .encode();

    let mut group = c.benchmark_group("report");
    group.bench_function("KeySelect_decode", |b| {
        b.iter(|| KeySelectReport::decode(black_box(&select)).expect("decode must succeed"))
    });
    group.bench_function("KeyData_to_binding_and_back", |b| {
        b.iter(|| {
            let report = KeyDataReport::decode(black_box(&data)).expect("decode must succeed");
            let binding = codec.to_binding(&report.record).expect("valid id");
            codec.to_record(black_box(&binding)).expect("registered behavior")
        })
    });
    group.finish();
}

/// Full `READ_KEYMAP` response encoding for growing grids.
fn bench_keymap_response(c: &mut Criterion) {
    let grids: &[(&str, u8, u8)] = &[
        ("2x4", 2, 4),
        ("4x42", 4, 42),
        ("8x104", 8, 104),
    ];

    let mut group = c.benchmark_group("encode_keymap_response");
    let mut buf = Vec::new();
    for (name, layers, keys) in grids {
        let payload = make_payload(*layers, *keys);
        group.bench_with_input(BenchmarkId::new("grid", name), &payload, |b, payload| {
            b.iter(|| {
                encode_keymap_response(black_box(payload), &mut buf).expect("grid fits frame")
            })
        });
    }
    group.finish();
}

/// Command decode with the header arriving in one piece.
fn bench_command_decode(c: &mut Criterion) {
    let bytes = [0x01u8, 0x00, 0x00, 0x00];
    c.bench_function("command_decode_read_keymap", |b| {
        b.iter(|| CommandFrame::decode(black_box(&bytes)).expect("decode must succeed"))
    });
}

criterion_group!(
    benches,
    bench_report_hot_path,
    bench_keymap_response,
    bench_command_decode
);
criterion_main!(benches);
