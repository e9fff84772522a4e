//! Benchmarks for the RSPL compiler pipeline.
//!
//! Measures a full compile of a representative overlay with and without the
//! optimizer, and the front end (preprocess, lex, parse) on its own.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rspl_compiler::compiler::lexer::Lexer;
use rspl_compiler::compiler::parser::parse;
use rspl_compiler::compiler::preprocess::{no_includes, preprocess};
use rspl_compiler::{compile, CompileConfig};
use std::collections::BTreeMap;

/// Vertex transform overlay: state, a macro, helper functions and commands.
const OVERLAY: &str = r#"
include "rsp_queue.inc";

#define VTX_STRIDE 16

state {
  vec32 MAT_MVP[4];
  alignas(16) u16 VIEWPORT[8] = {320, 240, 511, 0, 320, 240, 511, 0};
  u32 VTX_COUNT;
  u32 FLAGS = {0};
}

macro transform(vec32 pos, vec32 m0, vec32 m1, vec32 m2, vec32 m3) {
  vec32<$v26> acc;
  acc = m0 * pos.X;
  acc = m1 +* pos.Y;
  acc = m2 +* pos.Z;
  pos = m3 +* pos.W;
}

function load_matrix(u32<$s0> src) {
  vec32<$v16> r0 = load(src, 0x00);
  vec32<$v18> r1 = load(src, 0x20);
  vec32<$v20> r2 = load(src, 0x40);
  vec32<$v22> r3 = load(src, 0x60);
  store(r0, MAT_MVP, 0x00);
  store(r1, MAT_MVP, 0x20);
  store(r2, MAT_MVP, 0x40);
  store(r3, MAT_MVP, 0x60);
}

command<0> CmdSetMatrix(u32 addr) {
  u32<$s0> src = addr & 0xFFFFFF;
  load_matrix(src);
}

command<1> CmdTransform(u32 addr, u32 count) {
  u32<$s1> ptr = addr & 0xFFFFFF;
  u32<$s2> end = count * VTX_STRIDE;
  end += ptr;
  vec32<$v16> m0 = load(MAT_MVP, 0x00);
  vec32<$v18> m1 = load(MAT_MVP, 0x20);
  vec32<$v20> m2 = load(MAT_MVP, 0x40);
  vec32<$v22> m3 = load(MAT_MVP, 0x60);
  while (ptr != end) {
    vec32<$v02> pos = load(ptr);
    transform(pos, m0, m1, m2, m3);
    store(pos, ptr);
    ptr += VTX_STRIDE;
  }
  u32<$t0> n = load(VTX_COUNT);
  n += count;
  store(n, VTX_COUNT);
}

command<2> CmdSetFlags(u32 flags) {
  @Barrier("flags") store(flags, FLAGS);
  if (flags > 0xFFFF) { assert(0x11); }
}
"#;

fn bench_compile_optimized(c: &mut Criterion) {
    let config = CompileConfig::default();
    c.bench_function("compile_optimized", |b| b.iter(|| compile(black_box(OVERLAY), &config)));
}

fn bench_compile_unoptimized(c: &mut Criterion) {
    let config = CompileConfig { optimize: false, ..CompileConfig::default() };
    c.bench_function("compile_unoptimized", |b| b.iter(|| compile(black_box(OVERLAY), &config)));
}

fn bench_front_end(c: &mut Criterion) {
    let defines = BTreeMap::new();
    c.bench_function("preprocess_lex_parse", |b| {
        b.iter(|| {
            let text = preprocess(black_box(OVERLAY), &defines, &no_includes).ok()?;
            let tokens = Lexer::new(&text).tokenize().ok()?;
            parse(tokens).ok()
        })
    });
}

criterion_group!(benches, bench_compile_optimized, bench_compile_unoptimized, bench_front_end);
criterion_main!(benches);
