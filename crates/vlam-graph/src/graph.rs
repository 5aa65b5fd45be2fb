//! Pose-graph construction and optimization.
//!
//! A [`PoseGraph`] keeps a plain record of its variables and factors and
//! compiles them into a `tiny_solver::Problem` to optimize. The records
//! survive optimization so marginal covariances can be evaluated at the
//! solution afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use nalgebra::DVector;
use tiny_solver::manifold::se3::SE3Manifold;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::LevenbergMarquardtOptimizer;
use vlam_core::{Cov6, Iso3};

use crate::factors::{BetweenFactor, PriorFactor, ResectionFactor};
use crate::marginals;
use crate::se3::{iso_to_pose7, pose7_to_iso};

/// Solver options mapped onto tiny-solver's optimizer settings.
#[derive(Clone, Debug)]
pub struct SolveOptions {
    pub max_iters: usize,
    pub verbosity: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        let defaults = OptimizerOptions::default();
        Self {
            max_iters: defaults.max_iteration,
            verbosity: 0,
        }
    }
}

impl SolveOptions {
    fn to_optimizer_options(&self) -> OptimizerOptions {
        OptimizerOptions {
            max_iteration: self.max_iters,
            verbosity_level: self.verbosity,
            ..OptimizerOptions::default()
        }
    }
}

/// One factor and the variables it touches.
#[derive(Debug, Clone)]
pub(crate) enum FactorRecord {
    Resection { key: String, factor: ResectionFactor },
    Prior { key: String, factor: PriorFactor },
    Between {
        marker_key: String,
        camera_key: String,
        factor: BetweenFactor,
    },
}

impl FactorRecord {
    pub(crate) fn keys(&self) -> Vec<&str> {
        match self {
            FactorRecord::Resection { key, .. } | FactorRecord::Prior { key, .. } => {
                vec![key.as_str()]
            }
            FactorRecord::Between {
                marker_key,
                camera_key,
                ..
            } => vec![marker_key.as_str(), camera_key.as_str()],
        }
    }

    pub(crate) fn residual_dim(&self) -> usize {
        match self {
            FactorRecord::Resection { .. } => 2,
            FactorRecord::Prior { .. } | FactorRecord::Between { .. } => 6,
        }
    }

    /// Evaluate the whitened residual at f64 parameter blocks.
    pub(crate) fn residual(&self, params: &[DVector<f64>]) -> DVector<f64> {
        use tiny_solver::factors::Factor;
        match self {
            FactorRecord::Resection { factor, .. } => factor.residual_func(params),
            FactorRecord::Prior { factor, .. } => factor.residual_func(params),
            FactorRecord::Between { factor, .. } => factor.residual_func(params),
        }
    }
}

/// Nonlinear least-squares graph over SE(3) pose variables.
#[derive(Debug, Default, Clone)]
pub struct PoseGraph {
    records: Vec<FactorRecord>,
    initial: HashMap<String, DVector<f64>>,
    fixed: HashSet<String>,
}

impl PoseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) a variable's initial estimate.
    pub fn set_initial(&mut self, key: &str, pose: &Iso3) {
        self.initial.insert(key.to_string(), iso_to_pose7(pose));
    }

    /// Pin a variable at its initial estimate.
    ///
    /// Equivalent to a prior with infinite precision.
    pub fn fix_variable(&mut self, key: &str) {
        self.fixed.insert(key.to_string());
    }

    pub fn is_fixed(&self, key: &str) -> bool {
        self.fixed.contains(key)
    }

    pub fn add_resection_factor(&mut self, key: &str, factor: ResectionFactor) {
        self.records.push(FactorRecord::Resection {
            key: key.to_string(),
            factor,
        });
    }

    pub fn add_prior_factor(&mut self, key: &str, factor: PriorFactor) {
        self.records.push(FactorRecord::Prior {
            key: key.to_string(),
            factor,
        });
    }

    pub fn add_between_factor(&mut self, marker_key: &str, camera_key: &str, factor: BetweenFactor) {
        self.records.push(FactorRecord::Between {
            marker_key: marker_key.to_string(),
            camera_key: camera_key.to_string(),
            factor,
        });
    }

    pub(crate) fn records(&self) -> &[FactorRecord] {
        &self.records
    }

    fn compile(&self) -> Result<Problem> {
        ensure!(!self.records.is_empty(), "graph has no factors");
        for record in &self.records {
            for key in record.keys() {
                ensure!(
                    self.initial.contains_key(key),
                    "initial values missing variable {key}"
                );
            }
        }

        let mut problem = Problem::new();
        for key in self.initial.keys() {
            if self.fixed.contains(key) {
                for idx in 0..7 {
                    problem.fix_variable(key, idx);
                }
            } else {
                problem.set_variable_manifold(key, Arc::new(SE3Manifold));
            }
        }

        for record in &self.records {
            let keys = record.keys();
            match record {
                FactorRecord::Resection { factor, .. } => {
                    problem.add_residual_block(2, &keys, Box::new(factor.clone()), None);
                }
                FactorRecord::Prior { factor, .. } => {
                    problem.add_residual_block(6, &keys, Box::new(factor.clone()), None);
                }
                FactorRecord::Between { factor, .. } => {
                    problem.add_residual_block(6, &keys, Box::new(factor.clone()), None);
                }
            }
        }
        Ok(problem)
    }

    /// Optimize with Levenberg-Marquardt and return the solved graph.
    pub fn optimize(&self, opts: &SolveOptions) -> Result<GraphSolution<'_>> {
        let problem = self.compile()?;
        let optimizer = LevenbergMarquardtOptimizer::default();
        let values = optimizer
            .optimize(&problem, &self.initial, Some(opts.to_optimizer_options()))
            .ok_or_else(|| anyhow!("levenberg-marquardt failed to converge"))?;
        Ok(GraphSolution {
            graph: self,
            values,
        })
    }
}

/// Optimized variable values tied to the graph that produced them.
pub struct GraphSolution<'g> {
    graph: &'g PoseGraph,
    values: HashMap<String, DVector<f64>>,
}

impl GraphSolution<'_> {
    /// The optimized pose of a variable.
    pub fn pose(&self, key: &str) -> Result<Iso3> {
        let v = self
            .values
            .get(key)
            .ok_or_else(|| anyhow!("missing variable {key} in solution"))?;
        pose7_to_iso(v)
    }

    /// Marginal covariances, in graph-internal `(rx, ry, rz, tx, ty, tz)`
    /// order, for the requested variables. Fixed variables report zero.
    pub fn marginal_covariances(&self, keys: &[&str]) -> Result<HashMap<String, Cov6>> {
        marginals::marginal_covariances(self.graph, &self.values, keys)
    }
}
