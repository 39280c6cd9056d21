use faer::prelude::*;

use crate::error::{AeroelasticError, Result};
use crate::linear::state_space::StateSpace;

/// Linear structural model `M q'' + C q' + K q = f` with the flexible
/// degrees of freedom first and `num_dof_rig` rigid ones after them.
#[derive(Debug, Clone)]
pub struct LinearBeam {
    pub m: Mat<f64>,
    pub c: Mat<f64>,
    pub k: Mat<f64>,
    pub num_dof_flex: usize,
    pub num_dof_rig: usize,
}

impl LinearBeam {
    pub fn new(m: Mat<f64>, c: Mat<f64>, k: Mat<f64>, num_dof_rig: usize) -> Result<Self> {
        let n = m.nrows();
        for (what, mat) in [("beam mass", &m), ("beam damping", &c), ("beam stiffness", &k)] {
            if mat.nrows() != n || mat.ncols() != n {
                return Err(AeroelasticError::Dimension {
                    what,
                    expected: n,
                    found: mat.ncols().max(mat.nrows()),
                });
            }
        }
        if num_dof_rig > n {
            return Err(AeroelasticError::Dimension {
                what: "beam rigid degrees of freedom",
                expected: n,
                found: num_dof_rig,
            });
        }
        Ok(Self {
            m,
            c,
            k,
            num_dof_flex: n - num_dof_rig,
            num_dof_rig,
        })
    }

    pub fn n_dof(&self) -> usize {
        self.m.nrows()
    }

    /// Adds aerodynamic stiffness and damping to the structural matrices.
    pub fn add_aero_terms(&mut self, stiffness: MatRef<f64>, damping: MatRef<f64>) -> Result<()> {
        if stiffness.nrows() != self.n_dof() || damping.nrows() != self.n_dof() {
            return Err(AeroelasticError::Dimension {
                what: "aerodynamic gain matrix",
                expected: self.n_dof(),
                found: stiffness.nrows().min(damping.nrows()),
            });
        }
        self.k = &self.k + stiffness;
        self.c = &self.c + damping;
        Ok(())
    }

    /// Trapezoidal (Tustin) discretisation of `x = [q; q']` with nodal loads
    /// as input and the full state as output.
    pub fn state_space(&self, dt: f64) -> Result<StateSpace> {
        let n = self.n_dof();
        let lu = self.m.partial_piv_lu();
        let m_inv_k = lu.solve(&self.k);
        let m_inv_c = lu.solve(&self.c);
        let m_inv = lu.solve(Mat::<f64>::identity(n, n));
        if let Some(i) = (0..n).find(|&i| (0..n).any(|j| !m_inv[(i, j)].is_finite())) {
            return Err(AeroelasticError::config(
                "linear.beam",
                format!("mass matrix is singular at degree of freedom {i}"),
            ));
        }

        // Continuous system
        let mut a = Mat::<f64>::zeros(2 * n, 2 * n);
        a.as_mut()
            .submatrix_mut(0, n, n, n)
            .copy_from(Mat::<f64>::identity(n, n));
        a.as_mut().submatrix_mut(n, 0, n, n).copy_from(&m_inv_k * Scale(-1.));
        a.as_mut().submatrix_mut(n, n, n, n).copy_from(&m_inv_c * Scale(-1.));
        let mut b = Mat::<f64>::zeros(2 * n, n);
        b.as_mut().submatrix_mut(n, 0, n, n).copy_from(&m_inv);

        // (I - A dt/2) x+ = (I + A dt/2) x + dt B u
        let eye = Mat::<f64>::identity(2 * n, 2 * n);
        let lhs = &eye - &a * Scale(0.5 * dt);
        let lu = lhs.partial_piv_lu();
        let ad = lu.solve(&eye + &a * Scale(0.5 * dt));
        let bd = lu.solve(&b * Scale(dt));

        StateSpace::new(ad, bd, eye, Mat::zeros(2 * n, n), dt)
    }
}
