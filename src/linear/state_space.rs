use faer::prelude::*;

use crate::error::{AeroelasticError, Result};

/// Discrete-time state-space system
/// `x[n+1] = A x[n] + B u[n]`, `y[n] = C x[n] + D u[n]`.
#[derive(Debug, Clone)]
pub struct StateSpace {
    pub a: Mat<f64>, // [n_states][n_states]
    pub b: Mat<f64>, // [n_states][n_inputs]
    pub c: Mat<f64>, // [n_outputs][n_states]
    pub d: Mat<f64>, // [n_outputs][n_inputs]
    pub dt: f64,
}

fn check(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(AeroelasticError::Dimension {
            what,
            expected,
            found,
        });
    }
    Ok(())
}

impl StateSpace {
    pub fn new(a: Mat<f64>, b: Mat<f64>, c: Mat<f64>, d: Mat<f64>, dt: f64) -> Result<Self> {
        check("state matrix columns", a.nrows(), a.ncols())?;
        check("input matrix rows", a.nrows(), b.nrows())?;
        check("output matrix columns", a.nrows(), c.ncols())?;
        check("feedthrough rows", c.nrows(), d.nrows())?;
        check("feedthrough columns", b.ncols(), d.ncols())?;
        Ok(Self { a, b, c, d, dt })
    }

    pub fn states(&self) -> usize {
        self.a.nrows()
    }

    pub fn inputs(&self) -> usize {
        self.b.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.c.nrows()
    }

    /// One step: returns `(x[n+1], y[n])`.
    pub fn step(&self, x: MatRef<f64>, u: MatRef<f64>) -> (Mat<f64>, Mat<f64>) {
        let x_next = &self.a * x + &self.b * u;
        let y = &self.c * x + &self.d * u;
        (x_next, y)
    }

    /// Outputs for an input sequence starting from `x0`.
    pub fn simulate(&self, x0: MatRef<f64>, inputs: &[Mat<f64>]) -> Vec<Mat<f64>> {
        let mut x = x0.to_owned();
        inputs
            .iter()
            .map(|u| {
                let (x_next, y) = self.step(x.as_ref(), u.as_ref());
                x = x_next;
                y
            })
            .collect()
    }

    /// Equilibrium state under a constant input, `(I - A) x = B u`.
    pub fn steady_state(&self, u: MatRef<f64>) -> Result<Mat<f64>> {
        let n = self.states();
        let lhs = Mat::<f64>::identity(n, n) - &self.a;
        let rhs = &self.b * u;
        let x = lhs.partial_piv_lu().solve(&rhs);
        if let Some(i) = (0..n).find(|&i| !x[(i, 0)].is_finite()) {
            return Err(AeroelasticError::SingularSystem {
                timestep: 0,
                surface: 0,
                panel: i,
            });
        }
        Ok(x)
    }

    /// Replaces the inputs by `u = K u_new`.
    pub fn add_input_gain(&mut self, k: MatRef<f64>) -> Result<()> {
        check("input gain rows", self.inputs(), k.nrows())?;
        self.b = &self.b * k;
        self.d = &self.d * k;
        Ok(())
    }

    /// Replaces the outputs by `y_new = K y`.
    pub fn add_output_gain(&mut self, k: MatRef<f64>) -> Result<()> {
        check("output gain columns", self.outputs(), k.ncols())?;
        self.c = k * &self.c;
        self.d = k * &self.d;
        Ok(())
    }
}

/// Feedback interconnection `u1 += K12 y2`, `u2 += K21 y1`. The result keeps
/// the inputs `[u1; u2]` of both systems as external inputs and returns the
/// stacked outputs `[y1; y2]`; states are `[x1; x2]`.
pub fn couple(ss1: &StateSpace, ss2: &StateSpace, k12: MatRef<f64>, k21: MatRef<f64>) -> Result<StateSpace> {
    if (ss1.dt - ss2.dt).abs() > f64::EPSILON * ss1.dt.abs().max(1.) {
        return Err(AeroelasticError::config(
            "linear.dt",
            format!("coupled systems have different time steps {} and {}", ss1.dt, ss2.dt),
        ));
    }
    check("coupling gain K12 rows", ss1.inputs(), k12.nrows())?;
    check("coupling gain K12 columns", ss2.outputs(), k12.ncols())?;
    check("coupling gain K21 rows", ss2.inputs(), k21.nrows())?;
    check("coupling gain K21 columns", ss1.outputs(), k21.ncols())?;

    let (nx1, nx2) = (ss1.states(), ss2.states());
    let (nu1, nu2) = (ss1.inputs(), ss2.inputs());
    let (ny1, ny2) = (ss1.outputs(), ss2.outputs());
    let (nx, nu, ny) = (nx1 + nx2, nu1 + nu2, ny1 + ny2);

    let block = |m1: MatRef<f64>, m2: MatRef<f64>, rows: usize, cols: usize| {
        let mut m = Mat::zeros(rows, cols);
        m.as_mut()
            .submatrix_mut(0, 0, m1.nrows(), m1.ncols())
            .copy_from(m1);
        m.as_mut()
            .submatrix_mut(m1.nrows(), m1.ncols(), m2.nrows(), m2.ncols())
            .copy_from(m2);
        m
    };
    let a = block(ss1.a.as_ref(), ss2.a.as_ref(), nx, nx);
    let b = block(ss1.b.as_ref(), ss2.b.as_ref(), nx, nu);
    let c = block(ss1.c.as_ref(), ss2.c.as_ref(), ny, nx);
    let d = block(ss1.d.as_ref(), ss2.d.as_ref(), ny, nu);

    // u = u_ext + K y
    let mut k = Mat::<f64>::zeros(nu, ny);
    k.as_mut().submatrix_mut(0, ny1, nu1, ny2).copy_from(k12);
    k.as_mut().submatrix_mut(nu1, 0, nu2, ny1).copy_from(k21);

    // y = M (C x + D u_ext), M = (I - D K)^-1
    let lhs = Mat::<f64>::identity(ny, ny) - &d * &k;
    let lu = lhs.partial_piv_lu();
    let mc = lu.solve(&c);
    let md = lu.solve(&d);
    if let Some(i) = (0..ny).find(|&i| (0..nx).any(|j| !mc[(i, j)].is_finite())) {
        return Err(AeroelasticError::SingularSystem {
            timestep: 0,
            surface: 0,
            panel: i,
        });
    }

    let bk = &b * &k;
    let a_new = &a + &bk * &mc;
    let b_new = &b + &bk * &md;
    StateSpace::new(a_new, b_new, mc, md, ss1.dt)
}
