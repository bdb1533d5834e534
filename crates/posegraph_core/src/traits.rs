use std::any::Any;

use anyhow::Result;
use nalgebra::{DMatrix, DVector};

use crate::kernel::RobustKernel;

/// A state variable living on a smooth manifold.
///
/// The graph stores vertices type-erased; edges that need the concrete state
/// recover it through `as_any`.
pub trait Vertex {
    /// Tangent-space dimension of the manifold.
    fn dim(&self) -> usize;

    /// In-place retraction `x <- x [+] delta` with `delta.len() == dim()`.
    /// Must be the identity for `delta = 0` and differentiable at zero with
    /// identity Jacobian, so edge linearizations stay consistent.
    fn update(&mut self, delta: &DVector<f64>);

    fn as_any(&self) -> &dyn Any;
}

/// A measurement factor linking 1 to 3 vertices.
pub trait Edge {
    /// Ordered indices of the linked vertices.
    fn link(&self) -> &[usize];

    /// Arity of the factor, discovered from the link length.
    fn arity(&self) -> usize {
        self.link().len()
    }

    /// Information matrix (inverse measurement covariance), m x m symmetric
    /// positive semidefinite where m is the residual dimension.
    fn information(&self) -> &DMatrix<f64>;

    /// Optional robust kernel; `None` means plain least squares.
    fn kernel(&self) -> Option<&dyn RobustKernel> {
        None
    }

    /// Tangent-space residual r and one Jacobian per linked vertex,
    /// evaluated at the current vertex states. `jacobians[i]` must be
    /// m x dim(vertices[link()[i]]).
    fn residual(&self, vertices: &[Box<dyn Vertex>]) -> Result<(DVector<f64>, Vec<DMatrix<f64>>)>;

    /// Display name used by the reporter to aggregate per-kind error.
    fn kind(&self) -> &'static str {
        "edge"
    }
}
