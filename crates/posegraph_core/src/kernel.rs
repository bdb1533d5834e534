/// Robust kernels reweight the squared error of a factor so that outlier
/// measurements lose influence. `apply` returns the loss value rho(e2) and
/// the IRLS weight rho'(e2); the solver uses the weight to scale the
/// Gauss-Newton blocks of the factor (no second-order kernel term).
pub trait RobustKernel {
    /// Evaluates the kernel at a squared error `e2 >= 0`.
    /// Returns `(rho, weight)`.
    fn apply(&self, e2: f64) -> (f64, f64);
}

/// Plain least squares: rho = e2, weight = 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct L2Kernel;

impl RobustKernel for L2Kernel {
    fn apply(&self, e2: f64) -> (f64, f64) {
        (e2, 1.0)
    }
}

/// Huber kernel: quadratic below the threshold, linear above.
#[derive(Debug, Clone, Copy)]
pub struct HuberKernel {
    pub delta: f64,
}

impl HuberKernel {
    pub fn new(delta: f64) -> Self {
        Self { delta }
    }
}

impl RobustKernel for HuberKernel {
    fn apply(&self, e2: f64) -> (f64, f64) {
        let delta2 = self.delta * self.delta;
        if e2 <= delta2 {
            (e2, 1.0)
        } else {
            let e = e2.sqrt();
            (2.0 * self.delta * e - delta2, self.delta / e)
        }
    }
}

/// Cauchy kernel: rho = c^2 ln(1 + e2 / c^2), weight = 1 / (1 + e2 / c^2).
#[derive(Debug, Clone, Copy)]
pub struct CauchyKernel {
    pub c: f64,
}

impl CauchyKernel {
    pub fn new(c: f64) -> Self {
        Self { c }
    }
}

impl RobustKernel for CauchyKernel {
    fn apply(&self, e2: f64) -> (f64, f64) {
        let c2 = self.c * self.c;
        let ratio = e2 / c2;
        (c2 * (1.0 + ratio).ln(), 1.0 / (1.0 + ratio))
    }
}
