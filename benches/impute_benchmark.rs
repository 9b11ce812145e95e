use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use hcdr::impute::{SoftImpute, SoftImputeConfig};
use ndarray::Array2;
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Low-rank housing-like block with roughly 40% of the cells missing.
fn sparse_matrix(rows: usize, columns: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(0x5EED + rows as u64);
    let left: Vec<f64> = (0..rows).map(|_| rng.sample(Standard)).collect();
    let right: Vec<f64> = (0..columns).map(|_| rng.sample(Standard)).collect();
    Array2::from_shape_fn((rows, columns), |(i, j)| {
        if rng.gen_bool(0.4) {
            f64::NAN
        } else {
            left[i] * right[j] + 0.05 * rng.sample::<f64, _>(Standard)
        }
    })
}

fn benchmark_soft_impute(c: &mut Criterion) {
    let shapes = [(1_000_usize, 47_usize), (5_000, 47), (20_000, 47)];
    let matrices: Vec<_> = shapes
        .iter()
        .map(|&(rows, columns)| (rows, sparse_matrix(rows, columns)))
        .collect();
    let imputer = SoftImpute::new(SoftImputeConfig::default());

    let mut group = c.benchmark_group("soft_impute");
    group.sample_size(10);
    for (rows, matrix) in matrices.iter() {
        group.throughput(Throughput::Elements(matrix.len() as u64));

        group.bench_with_input(BenchmarkId::new("fit", rows), matrix, |b, input| {
            b.iter(|| {
                let fitted = imputer.fit(black_box(input.view()));
                black_box(fitted.is_ok());
            });
        });

        if let Ok(fitted) = imputer.fit(matrix.view()) {
            group.bench_with_input(BenchmarkId::new("predict", rows), matrix, |b, input| {
                b.iter(|| {
                    let completed = fitted.predict(black_box(input.view()));
                    black_box(completed.is_ok());
                });
            });
        }
    }
    group.finish();
}

criterion_group!(soft_impute, benchmark_soft_impute);
criterion_main!(soft_impute);
