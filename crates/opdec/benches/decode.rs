//! Decode throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use opdec::decode;

/// A realistic mix: prologue, arithmetic, memory traffic, branches.
const CODE: &[u8] = &[
    0x55, // push rbp
    0x48, 0x89, 0xE5, // mov rbp, rsp
    0x48, 0x83, 0xEC, 0x20, // sub rsp, 0x20
    0x48, 0x89, 0x7D, 0xF8, // mov [rbp-8], rdi
    0x48, 0x8B, 0x45, 0xF8, // mov rax, [rbp-8]
    0x48, 0x83, 0xC0, 0x01, // add rax, 1
    0x48, 0x89, 0x45, 0xF0, // mov [rbp-16], rax
    0x48, 0x83, 0x7D, 0xF0, 0x0A, // cmp qword [rbp-16], 10
    0x7E, 0x07, // jle +7
    0xB8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1
    0xEB, 0x05, // jmp +5
    0xB8, 0x00, 0x00, 0x00, 0x00, // mov eax, 0
    0xF3, 0x0F, 0x10, 0x45, 0xE8, // movss xmm0, [rbp-24]
    0x0F, 0x58, 0xC1, // addps xmm0, xmm1
    0xC5, 0xF0, 0x58, 0xC2, // vaddps xmm0, xmm1, xmm2
    0x48, 0x83, 0xC4, 0x20, // add rsp, 0x20
    0x5D, // pop rbp
    0xC3, // ret
];

fn decode_block(bytes: &[u8], mode: u32) -> usize {
    let mut offset = 0;
    let mut count = 0;
    while offset < bytes.len() {
        match decode(&bytes[offset..], mode, 0x1000 + offset as u64) {
            Ok(instr) => offset += instr.length(),
            Err(_) => offset += 1,
        }
        count += 1;
    }
    count
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(CODE.len() as u64));
    group.bench_function("block_64", |b| {
        b.iter(|| decode_block(black_box(CODE), 64))
    });
    group.bench_function("single_mov", |b| {
        b.iter(|| decode(black_box(&[0x48, 0x89, 0xD8]), 64, 0))
    });
    group.finish();
}

fn bench_format(c: &mut Criterion) {
    let instr = decode(&[0x48, 0x8B, 0x44, 0x8A, 0x04], 64, 0x1000).unwrap();
    let mut buf = [0u8; 64];
    c.bench_function("format", |b| {
        b.iter(|| opdec::format(black_box(&instr), &mut buf))
    });
}

criterion_group!(benches, bench_decode, bench_format);
criterion_main!(benches);
