use criterion::{Criterion, black_box, criterion_group, criterion_main};

use fv_linop::comm::NoComm;
use fv_linop::config::{CoreConfig, MatrixStorage, SumType};
use fv_linop::dispatch::DispatchContext;
use fv_linop::matrix::{Matrix, matrix_create, FillType};
use fv_linop::mesh::MeshAdjacency;

const N: usize = 100_000;

fn poisson(storage: MatrixStorage) -> Matrix {
    let adj = MeshAdjacency::line(N);
    let cfg = CoreConfig {
        matrix_storage: storage,
        ..CoreConfig::default()
    };
    let mut m = matrix_create(&adj, &cfg, FillType::Scalar, None).unwrap();
    let da = vec![2.0; N];
    let xa = vec![-1.0; 2 * (N - 1)];
    m.set_coefficients(false, Some(&da), &xa).unwrap();
    m
}

fn bench_storages(c: &mut Criterion) {
    let ctx = DispatchContext::serial();
    let mut group = c.benchmark_group("spmv_storage");
    for storage in [
        MatrixStorage::Native,
        MatrixStorage::Csr,
        MatrixStorage::Msr,
    ] {
        let m = poisson(storage);
        let mut x: Vec<f64> = (0..N).map(|i| (i % 17) as f64).collect();
        let mut y = vec![0.0; N];
        group.bench_function(m.storage_name(), |b| {
            b.iter(|| {
                m.vector_multiply(&ctx, &NoComm, black_box(&mut x), black_box(&mut y))
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_scatter_policies(c: &mut Criterion) {
    let mut group = c.benchmark_group("spmv_native_scatter");
    for (name, ctx) in [
        ("serial", DispatchContext::serial()),
        ("partials", DispatchContext::new().with_sum_type(SumType::Atomic)),
        ("coloured", DispatchContext::new().with_sum_type(SumType::Coloured)),
    ] {
        let m = poisson(MatrixStorage::Native);
        let mut x: Vec<f64> = (0..N).map(|i| (i % 17) as f64).collect();
        let mut y = vec![0.0; N];
        group.bench_function(name, |b| {
            b.iter(|| {
                m.vector_multiply(&ctx, &NoComm, black_box(&mut x), black_box(&mut y))
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_storages, bench_scatter_policies);
criterion_main!(benches);
