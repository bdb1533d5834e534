//! Block assembly of the Gauss-Newton normal equations.
//!
//! Walks edges in insertion order, validates the shapes each edge reports,
//! applies robust-kernel reweighting and accumulates `H[s_i, s_j] +=
//! w * J_i^T O J_j` and `g[s_i] += w * J_i^T O r` restricted to free
//! vertices. The output is a block list so the dense and sparse backends
//! share one assembly pass.

use anyhow::{Context, Result};
use nalgebra::{DMatrix, DVector};

use crate::graph::{Graph, GraphError};
use crate::kernel::L2Kernel;

/// Assembled normal equations `H dx = -g` for one linearization point.
#[derive(Debug)]
pub struct NormalSystem {
    /// Total free-parameter dimension.
    pub dim: usize,
    /// Hessian contributions as (row offset, col offset, block). Blocks may
    /// repeat an offset pair; they are summed by the backend.
    pub blocks: Vec<(usize, usize, DMatrix<f64>)>,
    pub gradient: DVector<f64>,
    /// Total kernel loss at the linearization point.
    pub score: f64,
}

static L2: L2Kernel = L2Kernel;

pub fn assemble(graph: &Graph) -> Result<NormalSystem> {
    let mut blocks = Vec::new();
    let mut gradient = DVector::zeros(graph.psize);
    let mut score = 0.0;

    for (edge_idx, edge) in graph.edges.iter().enumerate() {
        let link = edge.link();
        let arity = link.len();
        if !(1..=3).contains(&arity) {
            return Err(GraphError::UnsupportedArity {
                edge: edge_idx,
                arity,
            }
            .into());
        }
        for &vertex in link {
            if vertex >= graph.vertices.len() {
                return Err(GraphError::VertexOutOfRange {
                    edge: edge_idx,
                    vertex,
                }
                .into());
            }
        }

        let omega = edge.information();
        if omega.nrows() != omega.ncols() {
            return Err(GraphError::InformationShape {
                edge: edge_idx,
                rows: omega.nrows(),
                cols: omega.ncols(),
            }
            .into());
        }

        let (r, jacobians) = edge
            .residual(&graph.vertices)
            .with_context(|| format!("residual evaluation failed for edge {edge_idx}"))?;
        let m = r.len();
        if omega.nrows() != m {
            return Err(GraphError::ResidualShape {
                edge: edge_idx,
                residual: m,
                omega: omega.nrows(),
            }
            .into());
        }
        if jacobians.len() != arity {
            return Err(GraphError::JacobianCount {
                edge: edge_idx,
                expected: arity,
                got: jacobians.len(),
            }
            .into());
        }
        for (slot, jacobian) in jacobians.iter().enumerate() {
            let dim = graph.vertices[link[slot]].dim();
            if jacobian.nrows() != m || jacobian.ncols() != dim {
                return Err(GraphError::JacobianShape {
                    edge: edge_idx,
                    vertex: link[slot],
                    rows: jacobian.nrows(),
                    cols: jacobian.ncols(),
                    expected_rows: m,
                    expected_cols: dim,
                }
                .into());
            }
        }
        if !r.iter().all(|v| v.is_finite())
            || jacobians
                .iter()
                .any(|jacobian| jacobian.iter().any(|v| !v.is_finite()))
        {
            return Err(GraphError::NonFinite { edge: edge_idx }.into());
        }

        let e2 = (omega * &r).dot(&r);
        let kernel = edge.kernel().unwrap_or(&L2);
        let (rho, weight) = kernel.apply(e2);
        score += rho;

        // Edges touching only constant vertices contribute to the score alone.
        for i in 0..arity {
            let Some(s_i) = graph.offsets[link[i]] else {
                continue;
            };
            let jtw = jacobians[i].transpose() * omega * weight;
            let gi = &jtw * &r;
            let mut segment = gradient.rows_mut(s_i, gi.len());
            segment += &gi;
            for j in 0..arity {
                let Some(s_j) = graph.offsets[link[j]] else {
                    continue;
                };
                blocks.push((s_i, s_j, &jtw * &jacobians[j]));
            }
        }
    }

    Ok(NormalSystem {
        dim: graph.psize,
        blocks,
        gradient,
        score,
    })
}
