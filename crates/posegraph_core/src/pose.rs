//! SE(3) and SE(2) pose vertices with prior and between edges.
//!
//! Between-edge Jacobians use the adjoint form: for
//! `r = log(z^-1 * T0^-1 * T1)` the blocks are `J0 = -Ad(T10)` and
//! `J1 = I`, exact at zero residual and the usual Gauss-Newton
//! approximation elsewhere.

use std::any::Any;

use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector, Matrix3, Matrix4, Matrix6, Vector3, Vector6};

use crate::kernel::RobustKernel;
use crate::lie::{
    adjoint_se2, adjoint_se3, exp_se2, exp_se3, inv_se2, inv_se3, log_se2, log_se3,
};
use crate::traits::{Edge, Vertex};

fn mat6(m: &Matrix6<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(6, 6, m.as_slice())
}

fn mat3(m: &Matrix3<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(3, 3, m.as_slice())
}

/// SE(3) pose; the state is a homogeneous 4x4 transform.
pub struct Pose3Vertex {
    pub x: Matrix4<f64>,
}

impl Pose3Vertex {
    pub fn new(x: Matrix4<f64>) -> Self {
        Self { x }
    }
}

impl Vertex for Pose3Vertex {
    fn dim(&self) -> usize {
        6
    }

    fn update(&mut self, delta: &DVector<f64>) {
        self.x *= exp_se3(&Vector6::from_column_slice(delta.as_slice()));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// SE(2) pose; the state is a homogeneous 3x3 transform.
pub struct Pose2Vertex {
    pub x: Matrix3<f64>,
}

impl Pose2Vertex {
    pub fn new(x: Matrix3<f64>) -> Self {
        Self { x }
    }
}

impl Vertex for Pose2Vertex {
    fn dim(&self) -> usize {
        3
    }

    fn update(&mut self, delta: &DVector<f64>) {
        self.x *= exp_se2(&Vector3::from_column_slice(delta.as_slice()));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn pose3_at<'a>(vertices: &'a [Box<dyn Vertex>], idx: usize) -> Result<&'a Pose3Vertex> {
    vertices
        .get(idx)
        .ok_or_else(|| anyhow!("vertex {idx} does not exist"))?
        .as_any()
        .downcast_ref::<Pose3Vertex>()
        .ok_or_else(|| anyhow!("vertex {idx} is not a Pose3Vertex"))
}

fn pose2_at<'a>(vertices: &'a [Box<dyn Vertex>], idx: usize) -> Result<&'a Pose2Vertex> {
    vertices
        .get(idx)
        .ok_or_else(|| anyhow!("vertex {idx} does not exist"))?
        .as_any()
        .downcast_ref::<Pose2Vertex>()
        .ok_or_else(|| anyhow!("vertex {idx} is not a Pose2Vertex"))
}

/// Unary prior anchoring an SE(3) pose to a measured transform:
/// `r = log(z^-1 x)`.
pub struct Pose3Edge {
    link: [usize; 1],
    z: Matrix4<f64>,
    omega: DMatrix<f64>,
    kernel: Option<Box<dyn RobustKernel>>,
}

impl Pose3Edge {
    pub fn new(vertex: usize, z: Matrix4<f64>) -> Self {
        Self {
            link: [vertex],
            z,
            omega: DMatrix::identity(6, 6),
            kernel: None,
        }
    }

    pub fn with_information(mut self, omega: DMatrix<f64>) -> Self {
        self.omega = omega;
        self
    }

    pub fn with_kernel(mut self, kernel: Box<dyn RobustKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }
}

impl Edge for Pose3Edge {
    fn link(&self) -> &[usize] {
        &self.link
    }

    fn information(&self) -> &DMatrix<f64> {
        &self.omega
    }

    fn kernel(&self) -> Option<&dyn RobustKernel> {
        self.kernel.as_deref()
    }

    fn residual(&self, vertices: &[Box<dyn Vertex>]) -> Result<(DVector<f64>, Vec<DMatrix<f64>>)> {
        let vertex = pose3_at(vertices, self.link[0])?;
        let r = log_se3(&(inv_se3(&self.z) * vertex.x));
        Ok((
            DVector::from_column_slice(r.as_slice()),
            vec![DMatrix::identity(6, 6)],
        ))
    }

    fn kind(&self) -> &'static str {
        "Pose3Edge"
    }
}

/// Relative SE(3) constraint between two poses:
/// `r = log(z^-1 * T0^-1 * T1)`.
pub struct Pose3BetweenEdge {
    link: [usize; 2],
    z: Matrix4<f64>,
    omega: DMatrix<f64>,
    kernel: Option<Box<dyn RobustKernel>>,
}

impl Pose3BetweenEdge {
    pub fn new(from: usize, to: usize, z: Matrix4<f64>) -> Self {
        Self {
            link: [from, to],
            z,
            omega: DMatrix::identity(6, 6),
            kernel: None,
        }
    }

    pub fn with_information(mut self, omega: DMatrix<f64>) -> Self {
        self.omega = omega;
        self
    }

    pub fn with_kernel(mut self, kernel: Box<dyn RobustKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }
}

impl Edge for Pose3BetweenEdge {
    fn link(&self) -> &[usize] {
        &self.link
    }

    fn information(&self) -> &DMatrix<f64> {
        &self.omega
    }

    fn kernel(&self) -> Option<&dyn RobustKernel> {
        self.kernel.as_deref()
    }

    fn residual(&self, vertices: &[Box<dyn Vertex>]) -> Result<(DVector<f64>, Vec<DMatrix<f64>>)> {
        let t0 = pose3_at(vertices, self.link[0])?.x;
        let t1 = pose3_at(vertices, self.link[1])?.x;
        let t01 = inv_se3(&t0) * t1;
        let r = log_se3(&(inv_se3(&self.z) * t01));
        let j0 = -adjoint_se3(&inv_se3(&t01));
        Ok((
            DVector::from_column_slice(r.as_slice()),
            vec![mat6(&j0), DMatrix::identity(6, 6)],
        ))
    }

    fn kind(&self) -> &'static str {
        "Pose3BetweenEdge"
    }
}

/// Unary prior anchoring an SE(2) pose to a measured transform.
pub struct Pose2Edge {
    link: [usize; 1],
    z: Matrix3<f64>,
    omega: DMatrix<f64>,
    kernel: Option<Box<dyn RobustKernel>>,
}

impl Pose2Edge {
    pub fn new(vertex: usize, z: Matrix3<f64>) -> Self {
        Self {
            link: [vertex],
            z,
            omega: DMatrix::identity(3, 3),
            kernel: None,
        }
    }

    pub fn with_information(mut self, omega: DMatrix<f64>) -> Self {
        self.omega = omega;
        self
    }

    pub fn with_kernel(mut self, kernel: Box<dyn RobustKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }
}

impl Edge for Pose2Edge {
    fn link(&self) -> &[usize] {
        &self.link
    }

    fn information(&self) -> &DMatrix<f64> {
        &self.omega
    }

    fn kernel(&self) -> Option<&dyn RobustKernel> {
        self.kernel.as_deref()
    }

    fn residual(&self, vertices: &[Box<dyn Vertex>]) -> Result<(DVector<f64>, Vec<DMatrix<f64>>)> {
        let vertex = pose2_at(vertices, self.link[0])?;
        let r = log_se2(&(inv_se2(&self.z) * vertex.x));
        Ok((
            DVector::from_column_slice(r.as_slice()),
            vec![DMatrix::identity(3, 3)],
        ))
    }

    fn kind(&self) -> &'static str {
        "Pose2Edge"
    }
}

/// Relative SE(2) constraint between two poses.
pub struct Pose2BetweenEdge {
    link: [usize; 2],
    z: Matrix3<f64>,
    omega: DMatrix<f64>,
    kernel: Option<Box<dyn RobustKernel>>,
}

impl Pose2BetweenEdge {
    pub fn new(from: usize, to: usize, z: Matrix3<f64>) -> Self {
        Self {
            link: [from, to],
            z,
            omega: DMatrix::identity(3, 3),
            kernel: None,
        }
    }

    pub fn with_information(mut self, omega: DMatrix<f64>) -> Self {
        self.omega = omega;
        self
    }

    pub fn with_kernel(mut self, kernel: Box<dyn RobustKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }
}

impl Edge for Pose2BetweenEdge {
    fn link(&self) -> &[usize] {
        &self.link
    }

    fn information(&self) -> &DMatrix<f64> {
        &self.omega
    }

    fn kernel(&self) -> Option<&dyn RobustKernel> {
        self.kernel.as_deref()
    }

    fn residual(&self, vertices: &[Box<dyn Vertex>]) -> Result<(DVector<f64>, Vec<DMatrix<f64>>)> {
        let t0 = pose2_at(vertices, self.link[0])?.x;
        let t1 = pose2_at(vertices, self.link[1])?.x;
        let t01 = inv_se2(&t0) * t1;
        let r = log_se2(&(inv_se2(&self.z) * t01));
        let j0 = -adjoint_se2(&inv_se2(&t01));
        Ok((
            DVector::from_column_slice(r.as_slice()),
            vec![mat3(&j0), DMatrix::identity(3, 3)],
        ))
    }

    fn kind(&self) -> &'static str {
        "Pose2BetweenEdge"
    }
}
