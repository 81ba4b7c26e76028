use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use reweight::DynamicSampler;

fn gen_weights(n: usize) -> Vec<f64> {
    let mut rng = Pcg32::seed_from_u64(777);
    (0..n).map(|_| 0.1 + rng.random::<f64>()).collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampler_build");
    for &n in &[8usize, 64, 1024, 16_384] {
        let weights = gen_weights(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("from_weights_n={n}"), |b| {
            b.iter(|| black_box(DynamicSampler::from_weights(black_box(&weights))).unwrap());
        });
    }
    group.finish();
}

fn bench_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampler_sample");
    const DRAWS_PER_ITER: usize = 1024;

    for &n in &[8usize, 64, 1024, 16_384] {
        let s = DynamicSampler::from_weights(&gen_weights(n)).unwrap();
        group.throughput(Throughput::Elements(DRAWS_PER_ITER as u64));
        group.bench_function(format!("sample_n={n}"), |b| {
            b.iter_batched_ref(
                || Pcg32::seed_from_u64(999),
                |rng| {
                    let mut acc = 0usize;
                    for _ in 0..DRAWS_PER_ITER {
                        acc ^= s.sample(rng).unwrap();
                    }
                    black_box(acc)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampler_update");
    const OPS_PER_ITER: usize = 1024;

    for &n in &[64usize, 1024, 16_384] {
        group.throughput(Throughput::Elements(OPS_PER_ITER as u64));
        group.bench_function(format!("set_n={n}"), |b| {
            b.iter_batched_ref(
                || (DynamicSampler::from_weights(&gen_weights(n)).unwrap(), Pcg32::seed_from_u64(5)),
                |(s, rng)| {
                    for _ in 0..OPS_PER_ITER {
                        let i = rng.random_range(1..=n);
                        s.set(i, 0.1 + rng.random::<f64>()).unwrap();
                    }
                },
                BatchSize::SmallInput,
            );
        });

        // The adaptive loop: draw, then reweight what was drawn.
        group.bench_function(format!("churn_n={n}"), |b| {
            b.iter_batched_ref(
                || (DynamicSampler::from_weights(&gen_weights(n)).unwrap(), Pcg32::seed_from_u64(6)),
                |(s, rng)| {
                    for _ in 0..OPS_PER_ITER {
                        let i = s.sample(rng).unwrap();
                        s.set(i, 0.1 + rng.random::<f64>()).unwrap();
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(sampler, bench_build, bench_sample, bench_update);
criterion_main!(sampler);
