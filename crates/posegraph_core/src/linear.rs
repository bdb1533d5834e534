//! Linear solve of the assembled normal equations `H dx = -g`.
//!
//! Dense mode accumulates the blocks into a `DMatrix` and LU-solves; sparse
//! mode assembles COO triplets and factors with sparse Cholesky. Singular or
//! indefinite systems degrade to a pseudo-inverse least-squares step so the
//! outer iteration can continue.

use anyhow::{anyhow, ensure, Result};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::assemble::NormalSystem;

const PINV_EPS: f64 = 1e-12;

/// Sums the assembled blocks into a dense Hessian, with optional damping
/// added on the diagonal.
pub fn dense_hessian(system: &NormalSystem, damping: f64) -> DMatrix<f64> {
    let mut h = DMatrix::zeros(system.dim, system.dim);
    for (row, col, block) in &system.blocks {
        let mut view = h.view_mut((*row, *col), (block.nrows(), block.ncols()));
        view += block;
    }
    if damping > 0.0 {
        for i in 0..system.dim {
            h[(i, i)] += damping;
        }
    }
    h
}

/// Solves `H dx = -g` and returns the tangent-space step. Free vertex i
/// receives `dx[offset_i .. offset_i + dim_i]`.
pub fn solve_normal_equations(
    system: &NormalSystem,
    use_sparse: bool,
    damping: f64,
) -> Result<DVector<f64>> {
    if system.dim == 0 {
        return Ok(DVector::zeros(0));
    }
    let rhs = -&system.gradient;
    if use_sparse {
        solve_sparse(system, damping, &rhs)
    } else {
        solve_dense(&dense_hessian(system, damping), &rhs)
    }
}

fn solve_dense(h: &DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
    if let Some(dx) = h.clone().lu().solve(rhs) {
        if dx.iter().all(|v| v.is_finite()) {
            return Ok(dx);
        }
    }
    println!("Bad Hessian matrix!");
    pseudo_inverse_step(h, rhs)
}

fn pseudo_inverse_step(h: &DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
    let pinv = h
        .clone()
        .pseudo_inverse(PINV_EPS)
        .map_err(|message| anyhow!("pseudo-inverse fallback failed: {message}"))?;
    let dx = pinv * rhs;
    ensure!(
        dx.iter().all(|v| v.is_finite()),
        "non-finite step from pseudo-inverse fallback"
    );
    Ok(dx)
}

fn solve_sparse(system: &NormalSystem, damping: f64, rhs: &DVector<f64>) -> Result<DVector<f64>> {
    let mut coo = CooMatrix::new(system.dim, system.dim);
    for (row, col, block) in &system.blocks {
        for c in 0..block.ncols() {
            for r in 0..block.nrows() {
                let value = block[(r, c)];
                if value != 0.0 {
                    coo.push(row + r, col + c, value);
                }
            }
        }
    }
    if damping > 0.0 {
        for i in 0..system.dim {
            coo.push(i, i, damping);
        }
    }

    let csc = CscMatrix::from(&coo);
    match CscCholesky::factor(&csc) {
        Ok(factorization) => {
            let b = DMatrix::from_column_slice(system.dim, 1, rhs.as_slice());
            let solution = factorization.solve(&b);
            let dx: DVector<f64> = solution.column(0).into_owned();
            ensure!(
                dx.iter().all(|v| v.is_finite()),
                "non-finite step from sparse Cholesky solve"
            );
            Ok(dx)
        }
        Err(_) => {
            println!("Bad Hessian matrix!");
            pseudo_inverse_step(&dense_hessian(system, damping), rhs)
        }
    }
}
