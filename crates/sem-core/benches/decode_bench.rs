//! Criterion benchmarks for the per-transaction hot path: rule-table decode,
//! command classification and request framing.
//!
//! Run with:
//! ```bash
//! cargo bench --package sem-core --bench decode_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sem_core::decoder::{CommandDecoder, Phase, RuleTable};
use sem_core::domain::command::classify;
use sem_core::protocol::codec::{decode_request, encode_request};
use sem_core::RequestFrame;

const SHIPPED_RULES: &str = include_str!("../../../protocol_definitions.json");

const SET_ACCV: [u8; 12] = [
    0x02, 0x01, 0x00, 0x00, 0x08, 0x40, 0x02, 0x01, 0x00, 0xE0, 0x2E, 0x00,
];

fn fixtures() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("GetAccv", vec![0xC6, 0x11, 0x00, 0x04]),
        ("SetAccv", SET_ACCV.to_vec()),
        ("StatusBlock", vec![0xC0, 0x00, 0x00, 0x28]),
        ("Unknown", vec![0x7E, 0x00, 0x00, 0x00]),
    ]
}

fn bench_decode(c: &mut Criterion) {
    let decoder = CommandDecoder::new(
        RuleTable::from_json_str(SHIPPED_RULES).expect("rule table must parse for benchmark setup"),
    );
    let mut group = c.benchmark_group("decode");
    for (name, cdb) in fixtures() {
        group.bench_with_input(BenchmarkId::new("cdb", name), &cdb, |b, cdb| {
            b.iter(|| decoder.decode(black_box(cdb), None, Phase::Command))
        });
    }

    let tunnel = vec![0xFA, 0x00, 0x00, 0x0C];
    group.bench_function("tunnel", |b| {
        b.iter(|| decoder.decode(black_box(&tunnel), Some(black_box(&SET_ACCV)), Phase::Command))
    });
    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    for (name, cdb) in fixtures() {
        group.bench_with_input(BenchmarkId::new("cdb", name), &cdb, |b, cdb| {
            b.iter(|| classify(black_box(cdb)))
        });
    }
    group.finish();
}

fn bench_request_framing(c: &mut Criterion) {
    let req = RequestFrame::write(vec![0xFA, 0x00, 0x00, 0x0C], SET_ACCV.to_vec());
    c.bench_function("request_roundtrip", |b| {
        b.iter(|| {
            let bytes = encode_request(black_box(&req)).unwrap();
            decode_request(black_box(&bytes)).unwrap()
        })
    });
}

criterion_group!(benches, bench_decode, bench_classify, bench_request_framing);
criterion_main!(benches);
