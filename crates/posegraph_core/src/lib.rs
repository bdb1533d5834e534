//! The `posegraph_core` crate is the optimization back-end for Posegraph.
//! It solves nonlinear least-squares problems over factor graphs whose
//! variables live on smooth manifolds (SE(3), SE(2), Euclidean), as used by
//! SLAM-style pose estimation.
//!
//! Key components:
//! - **Traits**: `Vertex` (manifold state abstraction), `Edge` (measurement
//!   factors with residual/Jacobian hooks).
//! - **Graph**: container plus the Gauss-Newton iteration driver.
//! - **Assembler**: block accumulation of the normal equations H dx = -g.
//! - **Linear**: dense/sparse solve selection with pseudo-inverse fallback.
//! - **Lie**: exp/log maps and adjoints on SO(3)/SE(3)/SE(2).

pub mod assemble;
pub mod graph;
pub mod kernel;
pub mod lie;
pub mod linear;
pub mod pose;
pub mod traits;

pub use graph::{Graph, GraphError, GraphReport, SolveSettings, SolveSummary};
pub use kernel::{CauchyKernel, HuberKernel, L2Kernel, RobustKernel};
pub use traits::{Edge, Vertex};
