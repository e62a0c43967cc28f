//! RESP protocol benchmarks (spec §4.9): parsing a request off the wire and
//! encoding a reply back onto it.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kestrel::resp::assembler::CommandAssembler;
use kestrel::resp::writer::Writer;
use kestrel::resp::{RespValue, RespVersion};

const MAX_COMMAND_LENGTH: usize = 64 * 1024;
const MAX_ARGUMENTS: usize = 64;

fn bench_read_resp_array(c: &mut Criterion) {
    let buf = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n".to_vec();
    c.bench_function("resp_read_set_command", |b| {
        b.iter(|| {
            let mut assembler = CommandAssembler::new();
            match assembler.next_command(&buf, MAX_COMMAND_LENGTH, MAX_ARGUMENTS) {
                Ok(Some((args, consumed))) => black_box((args, consumed)),
                _ => panic!("expected a complete command"),
            }
        });
    });
}

fn bench_read_inline(c: &mut Criterion) {
    let buf = b"GET foo\r\n".to_vec();
    c.bench_function("resp_read_inline_command", |b| {
        b.iter(|| {
            let mut assembler = CommandAssembler::new();
            match assembler.next_command(&buf, MAX_COMMAND_LENGTH, MAX_ARGUMENTS) {
                Ok(Some((args, consumed))) => black_box((args, consumed)),
                _ => panic!("expected a complete command"),
            }
        });
    });
}

fn bench_encode_bulk_string(c: &mut Criterion) {
    let writer = Writer::new(RespVersion::Resp2);
    let value = RespValue::from_str("bar");
    c.bench_function("resp_encode_bulk_string", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(32);
            writer.encode(&value, &mut out);
            black_box(out);
        });
    });
}

fn bench_encode_array(c: &mut Criterion) {
    let writer = Writer::new(RespVersion::Resp3);
    let value = RespValue::array((0..32).map(|i| RespValue::from_str(format!("v{i}"))).collect());
    c.bench_function("resp_encode_array_32", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(512);
            writer.encode(&value, &mut out);
            black_box(out);
        });
    });
}

criterion_group!(benches, bench_read_resp_array, bench_read_inline, bench_encode_bulk_string, bench_encode_array);
criterion_main!(benches);
