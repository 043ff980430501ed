//! Line parser and framing benchmarks.
//!
//! Measures parse time for typical operator lines and the cost of framing
//! one result batch.

use criterion::{Criterion, criterion_group, criterion_main};
use stacker_common::channel::{FrameDecoder, encode_message};
use stacker_common::gcode::parse;
use stacker_common::message::ResultMessage;
use std::hint::black_box;

fn bench_parse(c: &mut Criterion) {
    let lines = [
        ("parse_bare", "G28"),
        ("parse_linear_move", "G0 X5 Y-3 Z0.25"),
        ("parse_machine", "M140 I0 S65.5"),
        ("parse_mixed", "M105 M114 G0 X1 Y2 Z3 H4 J5 K6"),
    ];

    for (name, line) in lines {
        c.bench_function(name, |b| {
            b.iter(|| parse(black_box(line)).unwrap());
        });
    }
}

fn bench_framing(c: &mut Criterion) {
    let batch: Vec<ResultMessage> = (0..16)
        .map(|i| ResultMessage::success("M114", serde_json::json!({"X": i}), "M114"))
        .collect();

    c.bench_function("encode_result_batch", |b| {
        b.iter(|| encode_message(black_box(&batch)).unwrap());
    });

    let bytes = encode_message(&batch).unwrap();
    c.bench_function("decode_result_batch", |b| {
        b.iter(|| FrameDecoder::new().push(black_box(&bytes)));
    });
}

criterion_group!(benches, bench_parse, bench_framing);
criterion_main!(benches);
