//! Vortex-lattice kernel: induction, influence matrices, circulation solve
//! and force recovery.

pub mod aic;
pub mod biot_savart;
pub mod solver;

use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{AeroelasticError, Result};

/// Runs the panel loops either on a dedicated pool of `num_cores` threads or
/// on the global rayon pool. Every parallel work item writes only its own
/// output entry, so results do not depend on the thread count.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    pool: Option<Arc<ThreadPool>>,
}

impl Executor {
    pub fn new(num_cores: usize) -> Result<Self> {
        if num_cores == 0 {
            return Ok(Self { pool: None });
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_cores)
            .build()
            .map_err(|e| AeroelasticError::config("uvlm.num_cores", e.to_string()))?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}
