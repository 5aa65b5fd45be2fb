//! Generic, model-agnostic RANSAC engine.
//!
//! Implement [`Estimator`] for a model and call [`ransac`] with the data and
//! some [`RansacOptions`]. The engine never panics: when no consensus is
//! found it returns a [`RansacResult`] with `model == None`.

use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};

/// Configuration for the RANSAC engine.
#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Maximum number of iterations.
    pub max_iters: usize,
    /// Inlier residual threshold, in the units of [`Estimator::residual`].
    pub thresh: f64,
    /// Minimum number of inliers required to accept a model.
    pub min_inliers: usize,
    /// Desired confidence in `[0, 1]` of having sampled an outlier-free set;
    /// drives the adaptive iteration bound.
    pub confidence: f64,
    /// RNG seed, for reproducibility.
    pub seed: u64,
    /// Refit the model on all inliers before scoring.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            thresh: 1.0,
            min_inliers: 6,
            confidence: 0.99,
            seed: 709,
            refit_on_inliers: true,
        }
    }
}

/// Output of a RANSAC run. `model` is `None` when no consensus set
/// satisfying the options was found.
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub model: Option<M>,
    /// Indices of inlier data points for the returned model.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over the inliers.
    pub inlier_rms: f64,
    /// Iterations actually performed.
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

/// Model estimator for RANSAC.
pub trait Estimator {
    type Datum;
    type Model;

    /// Minimal number of samples needed to fit a model.
    const MIN_SAMPLES: usize;

    /// Fit a model from the data at `sample` indices; `None` when the
    /// subset is degenerate or fitting fails.
    fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual of one datum under a model, in the same units
    /// as `RansacOptions::thresh`.
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Refit on the full inlier set; default keeps the sample model.
    fn refit(_data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(residuals: &[f64]) -> f64 {
    if residuals.is_empty() {
        return f64::INFINITY;
    }
    let ss: f64 = residuals.iter().map(|r| r * r).sum();
    (ss / residuals.len() as f64).sqrt()
}

/// Adaptive iteration bound from the current inlier ratio.
fn required_iterations(confidence: f64, inlier_ratio: f64, min_samples: usize) -> Option<usize> {
    if !(0.0..1.0).contains(&confidence) || inlier_ratio <= 0.0 {
        return None;
    }
    let denom = (1.0 - inlier_ratio.powi(min_samples as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return None;
    }
    Some(((1.0 - confidence).ln() / denom).ceil() as usize)
}

fn collect_inliers<E: Estimator>(
    data: &[E::Datum],
    model: &E::Model,
    thresh: f64,
    inliers: &mut Vec<usize>,
    residuals: &mut Vec<f64>,
) {
    inliers.clear();
    residuals.clear();
    for (i, datum) in data.iter().enumerate() {
        let r = E::residual(model, datum);
        if r <= thresh {
            inliers.push(i);
            residuals.push(r);
        }
    }
}

/// Run the RANSAC loop for an [`Estimator`].
pub fn ransac<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best: RansacResult<E::Model> = RansacResult::default();

    if data.len() < E::MIN_SAMPLES {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut rng = StdRng::seed_from_u64(opts.seed);

    let mut inliers = Vec::with_capacity(data.len());
    let mut residuals = Vec::with_capacity(data.len());

    let mut iter_bound = opts.max_iters;
    let mut iters = 0;
    while iters < iter_bound {
        iters += 1;

        let sample: Vec<usize> = all_indices
            .choose_multiple(&mut rng, E::MIN_SAMPLES)
            .copied()
            .collect();

        let Some(model) = E::fit(data, &sample) else {
            continue;
        };

        collect_inliers::<E>(data, &model, opts.thresh, &mut inliers, &mut residuals);
        if inliers.len() < opts.min_inliers {
            continue;
        }

        let mut model = model;
        if opts.refit_on_inliers {
            if let Some(refined) = E::refit(data, &inliers) {
                collect_inliers::<E>(data, &refined, opts.thresh, &mut inliers, &mut residuals);
                if inliers.len() < opts.min_inliers {
                    continue;
                }
                model = refined;
            }
        }

        let inlier_rms = rms(&residuals);
        let better = inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && inlier_rms < best.inlier_rms);
        if better {
            best.model = Some(model);
            best.inliers = inliers.clone();
            best.inlier_rms = inlier_rms;
            best.iters = iters;
        }

        let ratio = best.inliers.len() as f64 / data.len() as f64;
        if let Some(needed) = required_iterations(opts.confidence, ratio, E::MIN_SAMPLES) {
            iter_bound = needed.clamp(iters, opts.max_iters);
        }
    }

    best.iters = iters;
    best
}
