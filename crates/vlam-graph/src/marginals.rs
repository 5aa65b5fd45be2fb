//! Marginal covariances at the optimum.
//!
//! The Gauss-Newton covariance: assemble the whitened Jacobian of every
//! factor by central finite differences in the SE(3) tangent
//! (right-multiplicative retraction, rotation-first local coordinates),
//! form `H = J^T J`, invert, and read the per-variable 6x6 diagonal
//! blocks. Fixed variables carry no uncertainty and report zero.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector, Quaternion, UnitQuaternion, Vector3, Vector6};
use vlam_core::Cov6;

use crate::graph::PoseGraph;

const STEP: f64 = 1.0e-6;

/// Right-multiplicative retraction of a 7-vector pose along a tangent
/// `[rx, ry, rz, tx, ty, tz]`.
fn retract(pose: &DVector<f64>, delta: &Vector6<f64>) -> DVector<f64> {
    let q = UnitQuaternion::from_quaternion(Quaternion::new(pose[3], pose[0], pose[1], pose[2]));
    let dq = UnitQuaternion::from_scaled_axis(Vector3::new(delta[0], delta[1], delta[2]));
    let q_new = q * dq;

    let t = Vector3::new(pose[4], pose[5], pose[6]);
    let t_new = t + q * Vector3::new(delta[3], delta[4], delta[5]);

    let qc = q_new.into_inner().coords;
    nalgebra::dvector![qc[0], qc[1], qc[2], qc[3], t_new.x, t_new.y, t_new.z]
}

pub(crate) fn marginal_covariances(
    graph: &PoseGraph,
    values: &HashMap<String, DVector<f64>>,
    keys: &[&str],
) -> Result<HashMap<String, Cov6>> {
    // Block layout over free variables, in a stable order.
    let mut free: Vec<String> = values
        .keys()
        .filter(|k| !graph.is_fixed(k))
        .cloned()
        .collect();
    free.sort();
    let offsets: HashMap<&str, usize> = free
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), 6 * i))
        .collect();

    let n = 6 * free.len();
    let m: usize = graph.records().iter().map(|r| r.residual_dim()).sum();
    if n == 0 {
        // Everything fixed: every requested marginal is zero.
        return Ok(keys
            .iter()
            .map(|k| (k.to_string(), Cov6::zeros()))
            .collect());
    }

    let mut jacobian = DMatrix::<f64>::zeros(m, n);
    let mut row = 0;
    for record in graph.records() {
        let record_keys = record.keys();
        let dim = record.residual_dim();

        let params: Vec<DVector<f64>> = record_keys
            .iter()
            .map(|k| {
                values
                    .get(*k)
                    .cloned()
                    .ok_or_else(|| anyhow!("missing variable {k} in solution"))
            })
            .collect::<Result<_>>()?;

        for (slot, key) in record_keys.iter().enumerate() {
            let Some(&col0) = offsets.get(*key) else {
                continue; // fixed variable, no columns
            };
            for j in 0..6 {
                let mut delta = Vector6::zeros();
                delta[j] = STEP;
                let mut params_fwd = params.clone();
                params_fwd[slot] = retract(&params[slot], &delta);
                let r_fwd = record.residual(&params_fwd);

                delta[j] = -STEP;
                let mut params_bwd = params.clone();
                params_bwd[slot] = retract(&params[slot], &delta);
                let r_bwd = record.residual(&params_bwd);

                for i in 0..dim {
                    jacobian[(row + i, col0 + j)] = (r_fwd[i] - r_bwd[i]) / (2.0 * STEP);
                }
            }
        }
        row += dim;
    }

    let hessian = jacobian.transpose() * &jacobian;
    let chol = hessian
        .cholesky()
        .ok_or_else(|| anyhow!("graph hessian is singular; marginals unavailable"))?;
    let covariance = chol.inverse();

    let mut out = HashMap::new();
    for key in keys {
        let cov = match offsets.get(*key) {
            Some(&off) => {
                let mut block = Cov6::zeros();
                for r in 0..6 {
                    for c in 0..6 {
                        block[(r, c)] = covariance[(off + r, off + c)];
                    }
                }
                block
            }
            None => Cov6::zeros(),
        };
        out.insert(key.to_string(), cov);
    }
    Ok(out)
}
