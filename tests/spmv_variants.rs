//! Cross-checks between matrix storage variants and dispatch policies.

use fv_linop::comm::NoComm;
use fv_linop::config::{CoreConfig, MatrixStorage, SumType};
use fv_linop::dispatch::DispatchContext;
use fv_linop::matrix::{Matrix, matrix_create, FillType};
use fv_linop::mesh::MeshAdjacency;
use proptest::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};

const STORAGES: [MatrixStorage; 3] = [
    MatrixStorage::Native,
    MatrixStorage::Csr,
    MatrixStorage::Msr,
];

fn build(adj: &MeshAdjacency, storage: MatrixStorage, da: &[f64], xa: &[f64]) -> Matrix {
    let cfg = CoreConfig {
        matrix_storage: storage,
        ..CoreConfig::default()
    };
    let mut m = matrix_create(adj, &cfg, FillType::Scalar, None).unwrap();
    m.set_coefficients(false, Some(da), xa).unwrap();
    m
}

fn poisson_arrays(n: usize) -> (Vec<f64>, Vec<f64>) {
    (vec![2.0; n], vec![-1.0; 2 * (n - 1)])
}

#[test]
fn storages_agree_on_poisson_times_ones() {
    let n = 100;
    let adj = MeshAdjacency::line(n);
    let (da, xa) = poisson_arrays(n);
    let ctx = DispatchContext::serial();
    for storage in STORAGES {
        let m = build(&adj, storage, &da, &xa);
        let mut x = vec![1.0; n];
        let mut y = vec![0.0; n];
        m.vector_multiply(&ctx, &NoComm, &mut x, &mut y).unwrap();
        assert_eq!(y[0], 1.0, "{}", m.storage_name());
        assert_eq!(y[n - 1], 1.0, "{}", m.storage_name());
        assert!(y[1..n - 1].iter().all(|&v| v == 0.0));
    }
}

#[test]
fn dispatch_policies_agree_on_native() {
    let n = 200;
    let adj = MeshAdjacency::line(n);
    let mut rng = StdRng::seed_from_u64(7);
    let da: Vec<f64> = (0..n).map(|_| rng.gen_range(1.0..4.0)).collect();
    let xa: Vec<f64> = (0..2 * (n - 1)).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let x0: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let mut reference = Vec::new();
    let contexts = [
        DispatchContext::serial(),
        DispatchContext::new().with_sum_type(SumType::Atomic),
        DispatchContext::new().with_sum_type(SumType::Coloured),
    ];
    for ctx in contexts {
        let m = build(&adj, MatrixStorage::Native, &da, &xa);
        let mut x = x0.clone();
        let mut y = vec![0.0; n];
        m.vector_multiply(&ctx, &NoComm, &mut x, &mut y).unwrap();
        if reference.is_empty() {
            reference = y;
        } else {
            for (a, b) in reference.iter().zip(&y) {
                assert!((a - b).abs() < 1e-12, "{a} vs {b}");
            }
        }
    }
}

#[test]
fn symmetric_coefficients_make_a_symmetric_operator() {
    let n = 40;
    let adj = MeshAdjacency::line(n);
    let mut rng = StdRng::seed_from_u64(11);
    let da: Vec<f64> = (0..n).map(|_| rng.gen_range(2.0..5.0)).collect();
    let xa: Vec<f64> = (0..n - 1).map(|_| rng.gen_range(-1.0..0.0)).collect();
    let ctx = DispatchContext::serial();
    for storage in STORAGES {
        let cfg = CoreConfig {
            matrix_storage: storage,
            ..CoreConfig::default()
        };
        let mut m = matrix_create(&adj, &cfg, FillType::Scalar, None).unwrap();
        m.set_coefficients(true, Some(&da), &xa).unwrap();

        let mut u: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut v: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut au = vec![0.0; n];
        let mut av = vec![0.0; n];
        m.vector_multiply(&ctx, &NoComm, &mut u, &mut au).unwrap();
        m.vector_multiply(&ctx, &NoComm, &mut v, &mut av).unwrap();
        let uav: f64 = u.iter().zip(&av).map(|(a, b)| a * b).sum();
        let vau: f64 = v.iter().zip(&au).map(|(a, b)| a * b).sum();
        assert!((uav - vau).abs() < 1e-10, "{}: {uav} vs {vau}", m.storage_name());
    }
}

#[test]
fn exclude_diag_agrees_across_storages() {
    let n = 60;
    let adj = MeshAdjacency::line(n);
    let (da, xa) = poisson_arrays(n);
    let ctx = DispatchContext::serial();
    let mut reference = Vec::new();
    for storage in STORAGES {
        let m = build(&adj, storage, &da, &xa);
        let mut x: Vec<f64> = (0..n).map(|i| (i as f64 * 0.1).sin()).collect();
        let mut y = vec![0.0; n];
        m.vector_multiply_exd(&ctx, &NoComm, &mut x, &mut y).unwrap();
        if reference.is_empty() {
            reference = y;
        } else {
            for (a, b) in reference.iter().zip(&y) {
                assert!((a - b).abs() < 1e-13);
            }
        }
    }
}

proptest! {
    /// Whatever the coefficients, the three storages compute the same
    /// product.
    #[test]
    fn storages_agree_on_arbitrary_coefficients(
        da in prop::collection::vec(-5.0f64..5.0, 12),
        xa in prop::collection::vec(-5.0f64..5.0, 22),
        x0 in prop::collection::vec(-2.0f64..2.0, 12),
    ) {
        let n = 12;
        let adj = MeshAdjacency::line(n);
        let ctx = DispatchContext::serial();
        let mut reference: Option<Vec<f64>> = None;
        for storage in STORAGES {
            let m = build(&adj, storage, &da, &xa);
            let mut x = x0.clone();
            let mut y = vec![0.0; n];
            m.vector_multiply(&ctx, &NoComm, &mut x, &mut y).unwrap();
            match &reference {
                None => reference = Some(y),
                Some(r) => {
                    for (a, b) in r.iter().zip(&y) {
                        prop_assert!((a - b).abs() < 1e-11);
                    }
                }
            }
        }
    }
}
