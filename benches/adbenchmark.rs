use aad_core::{tape, Number};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn ad_benchmark(c: &mut Criterion) {
    c.bench_function("mul operations in tape", |b| {
        b.iter(|| {
            tape::clear();
            let a = Number::new(1.0);
            let bb = Number::new(2.0);
            let mut product = a * bb;
            for _ in 0..100_000 {
                product = product * bb;
            }
            black_box(product);
        })
    });

    c.bench_function("mul operations with reverse sweep", |b| {
        b.iter(|| {
            tape::clear();
            let a = Number::new(1.0);
            let bb = Number::new(2.0);
            let mut product = a * bb;
            for _ in 0..10_000 {
                product = product * bb;
            }
            product.propagate_to_start();
            black_box(a.adjoint());
        })
    });

    c.bench_function("rewind reuses tape arena", |b| {
        tape::clear();
        b.iter(|| {
            tape::rewind();
            let x = Number::new(3.0);
            let mut y = x;
            for _ in 0..1_000 {
                y = y + x;
            }
            black_box(y);
        })
    });
}

criterion_group!(benches, ad_benchmark);
criterion_main!(benches);
