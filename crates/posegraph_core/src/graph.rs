//! Factor-graph container and the Gauss-Newton iteration driver.

use anyhow::{bail, Context, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assemble::assemble;
use crate::kernel::L2Kernel;
use crate::linear::solve_normal_equations;
use crate::traits::{Edge, Vertex};

/// Contract violations detected while walking the graph. All of these are
/// fatal and abort the solve; the only recoverable failure is a singular
/// Hessian, which the linear backend handles with a pseudo-inverse step.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("edge {edge} links vertex {vertex}, which does not exist")]
    VertexOutOfRange { edge: usize, vertex: usize },
    #[error("edge {edge} has arity {arity}, supported arities are 1 to 3")]
    UnsupportedArity { edge: usize, arity: usize },
    #[error("edge {edge}: information matrix is {rows}x{cols}, expected square")]
    InformationShape { edge: usize, rows: usize, cols: usize },
    #[error("edge {edge}: residual has length {residual} but information matrix is {omega}x{omega}")]
    ResidualShape {
        edge: usize,
        residual: usize,
        omega: usize,
    },
    #[error("edge {edge}: expected {expected} jacobians, got {got}")]
    JacobianCount {
        edge: usize,
        expected: usize,
        got: usize,
    },
    #[error(
        "edge {edge}: jacobian for vertex {vertex} is {rows}x{cols}, expected {expected_rows}x{expected_cols}"
    )]
    JacobianShape {
        edge: usize,
        vertex: usize,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },
    #[error("edge {edge}: residual or jacobian contains non-finite values")]
    NonFinite { edge: usize },
}

/// Settings controlling one `solve` call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolveSettings {
    /// Print the per-iteration score trace.
    pub show_info: bool,
    /// Terminate once the score improves by less than this between
    /// consecutive iterations (after the iteration floor).
    pub min_score_change: f64,
    /// When positive, uniformly scale the step so that `max|dx|` does not
    /// exceed this value.
    pub step_limit: f64,
    /// Levenberg-style diagonal damping added to H before the solve. Kept
    /// constant across iterations; 0 disables it.
    pub damping: f64,
}

impl Default for SolveSettings {
    fn default() -> Self {
        Self {
            show_info: true,
            min_score_change: 0.01,
            step_limit: 0.0,
            damping: 0.0,
        }
    }
}

/// Outcome of a `solve` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveSummary {
    /// Number of linearizations performed.
    pub iterations: usize,
    /// Score at each linearization point, in order.
    pub score_trace: Vec<f64>,
}

impl SolveSummary {
    pub fn final_score(&self) -> f64 {
        self.score_trace.last().copied().unwrap_or(0.0)
    }
}

/// Diagnostic totals produced by `Graph::report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphReport {
    pub parameters: usize,
    pub vertices: usize,
    pub edges: usize,
    pub total_error: f64,
    /// Kernel loss per edge kind, ordered by first appearance.
    pub per_kind: Vec<(String, f64)>,
}

impl GraphReport {
    pub fn print(&self) {
        println!("---------------------");
        println!("The number of parameters: {}.", self.parameters);
        println!("The number of vertices: {}.", self.vertices);
        println!("The number of edges: {}.", self.edges);
        println!("Overall error: {:.6}.", self.total_error);
        for (kind, error) in &self.per_kind {
            println!(" -> {kind:<20}: {error:.4}");
        }
        println!("---------------------");
    }
}

/// A factor graph of manifold-valued vertices and measurement edges.
///
/// Vertices and edges are append-only and addressed by insertion index;
/// edges refer to vertices by index, never by reference. Free vertices own
/// a contiguous block of the stacked tangent vector starting at their
/// offset; constant vertices have no offset and never move.
pub struct Graph {
    pub(crate) vertices: Vec<Box<dyn Vertex>>,
    pub(crate) edges: Vec<Box<dyn Edge>>,
    pub(crate) free: Vec<bool>,
    pub(crate) offsets: Vec<Option<usize>>,
    pub(crate) psize: usize,
    use_sparse: bool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Graph using the dense linear backend.
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    /// Graph using the sparse linear backend. Preferable for large
    /// pose-graph problems where H has low fill.
    pub fn sparse() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(use_sparse: bool) -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
            free: Vec::new(),
            offsets: Vec::new(),
            psize: 0,
            use_sparse,
        }
    }

    /// Appends a vertex and returns its stable index.
    pub fn add_vertex(&mut self, vertex: Box<dyn Vertex>, is_constant: bool) -> usize {
        if is_constant {
            self.offsets.push(None);
        } else {
            self.offsets.push(Some(self.psize));
            self.psize += vertex.dim();
        }
        self.free.push(!is_constant);
        self.vertices.push(vertex);
        self.vertices.len() - 1
    }

    /// Removes a vertex from the optimized parameter set. Later free
    /// vertices shift down to keep offsets contiguous. No-op when the
    /// vertex is already constant.
    pub fn set_constant(&mut self, idx: usize) {
        if !self.free[idx] {
            return;
        }
        let dim = self.vertices[idx].dim();
        self.psize -= dim;
        self.free[idx] = false;
        self.offsets[idx] = None;
        for offset in self.offsets.iter_mut().skip(idx + 1) {
            if let Some(offset) = offset {
                *offset -= dim;
            }
        }
    }

    /// Appends an edge and returns its index.
    pub fn add_edge(&mut self, edge: Box<dyn Edge>) -> usize {
        self.edges.push(edge);
        self.edges.len() - 1
    }

    /// Total free-parameter dimension.
    pub fn psize(&self) -> usize {
        self.psize
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn is_free(&self, idx: usize) -> bool {
        self.free[idx]
    }

    /// Offset of a free vertex inside the stacked tangent vector; `None`
    /// for constant vertices.
    pub fn offset(&self, idx: usize) -> Option<usize> {
        self.offsets[idx]
    }

    pub fn vertex(&self, idx: usize) -> &dyn Vertex {
        self.vertices[idx].as_ref()
    }

    pub fn edge(&self, idx: usize) -> &dyn Edge {
        self.edges[idx].as_ref()
    }

    /// Concrete-typed view of a vertex, for callers that know what they
    /// stored there.
    pub fn vertex_as<V: Vertex + 'static>(&self, idx: usize) -> Option<&V> {
        self.vertices.get(idx)?.as_any().downcast_ref()
    }

    /// Runs linearize / solve / update until the score improvement drops
    /// below `min_score_change` (with a floor of 6 iterations).
    ///
    /// The convergence test compares pre-update scores, so the state
    /// returned is one update beyond the last evaluated score; re-linearize
    /// or call `report` for the exact final error.
    pub fn solve(&mut self, settings: SolveSettings) -> Result<SolveSummary> {
        if !(settings.min_score_change > 0.0) {
            bail!("min_score_change must be positive.");
        }
        if !(settings.step_limit >= 0.0) {
            bail!("step_limit must be non-negative.");
        }
        if !(settings.damping >= 0.0) {
            bail!("damping must be non-negative.");
        }

        if self.psize == 0 {
            let system = assemble(self)?;
            if settings.show_info {
                println!("iter 0: {:.6}", system.score);
            }
            return Ok(SolveSummary {
                iterations: 0,
                score_trace: vec![system.score],
            });
        }

        let mut last_score = f64::INFINITY;
        let mut score_trace = Vec::new();
        let mut iter = 0usize;
        loop {
            let system = assemble(self)?;
            let score = system.score;
            let mut dx = solve_normal_equations(&system, self.use_sparse, settings.damping)?;
            if settings.step_limit > 0.0 {
                let max_abs = dx.amax();
                if max_abs > settings.step_limit {
                    dx *= settings.step_limit / max_abs;
                }
            }
            iter += 1;
            if settings.show_info {
                println!("iter {iter}: {score:.6}");
            }
            score_trace.push(score);
            if last_score - score < settings.min_score_change && iter > 5 {
                break;
            }
            self.apply_update(&dx);
            last_score = score;
        }

        Ok(SolveSummary {
            iterations: iter,
            score_trace,
        })
    }

    fn apply_update(&mut self, dx: &DVector<f64>) {
        for (idx, vertex) in self.vertices.iter_mut().enumerate() {
            if let Some(offset) = self.offsets[idx] {
                let delta = dx.rows(offset, vertex.dim()).into_owned();
                vertex.update(&delta);
            }
        }
    }

    /// Sums the kernel loss over all edges, grouped by edge kind, prints
    /// the totals and returns them.
    pub fn report(&self) -> Result<GraphReport> {
        static L2: L2Kernel = L2Kernel;
        let mut total_error = 0.0;
        let mut per_kind: Vec<(String, f64)> = Vec::new();
        for (edge_idx, edge) in self.edges.iter().enumerate() {
            let (r, _) = edge
                .residual(&self.vertices)
                .with_context(|| format!("residual evaluation failed for edge {edge_idx}"))?;
            let omega = edge.information();
            if omega.nrows() != omega.ncols() || omega.nrows() != r.len() {
                return Err(GraphError::ResidualShape {
                    edge: edge_idx,
                    residual: r.len(),
                    omega: omega.nrows(),
                }
                .into());
            }
            let e2 = (omega * &r).dot(&r);
            let kernel = edge.kernel().unwrap_or(&L2);
            let (rho, _) = kernel.apply(e2);
            total_error += rho;
            match per_kind.iter_mut().find(|(kind, _)| kind == edge.kind()) {
                Some((_, sum)) => *sum += rho,
                None => per_kind.push((edge.kind().to_string(), rho)),
            }
        }

        let report = GraphReport {
            parameters: self.psize,
            vertices: self.vertices.len(),
            edges: self.edges.len(),
            total_error,
            per_kind,
        };
        report.print();
        Ok(report)
    }
}
