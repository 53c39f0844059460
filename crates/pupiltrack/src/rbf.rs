//! Hierarchical Gaussian RBF regression from 2D inputs to a scalar.
//!
//! The model is an affine least-squares term followed by `layers` Gaussian
//! layers. Layer `k` uses radius `base_radius / 2^k` and fits whatever
//! residual the affine term and the coarser layers left behind:
//!
//! ```text
//! f(p) = c0 + c1·x + c2·y + Σ_k Σ_j w_kj · exp(−|p − p_j|² / r_k²)
//! ```
//!
//! Each layer solves `(K + λI) w = r` with an SVD pseudo-inverse, so
//! singular kernels (coincident or colinear samples, very wide radii) still
//! produce the minimum-norm solution instead of failing.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// Singular values below this fraction of the largest are treated as zero.
const SVD_REL_TOL: f64 = 1e-10;

/// Residual norms below this fraction of the data norm are not refit.
const RESIDUAL_REL_TOL: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RbfHyperparameters {
    /// Radius of the coarsest Gaussian layer (input units).
    pub base_radius: f64,
    /// Number of Gaussian layers; `0` keeps only the affine term.
    pub layers: usize,
    /// Tikhonov regularizer added to each layer's kernel diagonal.
    pub regularizer: f64,
}

impl RbfHyperparameters {
    fn validate(&self) -> Result<(), TrackError> {
        if !(self.base_radius.is_finite() && self.base_radius > 0.0) {
            return Err(TrackError::InvalidInput(format!(
                "RBF base radius must be positive, got {}",
                self.base_radius
            )));
        }
        if !(self.regularizer.is_finite() && self.regularizer >= 0.0) {
            return Err(TrackError::InvalidInput(format!(
                "RBF regularizer must be non-negative, got {}",
                self.regularizer
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RbfLayer {
    radius: f64,
    weights: Vec<f64>,
}

/// Fitted RBF interpolant with its training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbfModel {
    params: RbfHyperparameters,
    /// Training triples `[x, y, value]`.
    samples: Vec<[f64; 3]>,
    affine: [f64; 3],
    layers: Vec<RbfLayer>,
    /// Leave-one-out RMS error, once computed.
    loo_rms: Option<f64>,
}

impl RbfModel {
    /// Fit a model to `values` sampled at `(xs[i], ys[i])`.
    pub fn fit(
        xs: &[f64],
        ys: &[f64],
        values: &[f64],
        params: RbfHyperparameters,
    ) -> Result<Self, TrackError> {
        if xs.len() != ys.len() || xs.len() != values.len() {
            return Err(TrackError::InvalidInput(format!(
                "sample arrays differ in length: {} x, {} y, {} values",
                xs.len(),
                ys.len(),
                values.len()
            )));
        }
        let samples: Vec<[f64; 3]> = xs
            .iter()
            .zip(ys)
            .zip(values)
            .map(|((&x, &y), &v)| [x, y, v])
            .collect();
        Self::fit_samples(samples, params)
    }

    fn fit_samples(samples: Vec<[f64; 3]>, params: RbfHyperparameters) -> Result<Self, TrackError> {
        params.validate()?;
        if samples.is_empty() {
            return Err(TrackError::InvalidInput("RBF fit needs at least one sample".into()));
        }
        if samples.iter().flatten().any(|v| !v.is_finite()) {
            return Err(TrackError::InvalidInput("RBF samples must be finite".into()));
        }

        let n = samples.len();
        let values = DVector::from_iterator(n, samples.iter().map(|s| s[2]));
        let design = DMatrix::from_fn(n, 3, |i, j| match j {
            0 => 1.0,
            1 => samples[i][0],
            _ => samples[i][1],
        });
        let c = pseudo_solve(design.clone(), &values)?;
        let affine = [c[0], c[1], c[2]];
        let mut residual = &values - &design * &c;

        let floor = RESIDUAL_REL_TOL * (1.0 + values.norm());
        let mut layers = Vec::with_capacity(params.layers);
        for k in 0..params.layers {
            let radius = params.base_radius / f64::powi(2.0, k as i32);
            let kernel = kernel_matrix(&samples, radius);
            let weights = if residual.norm() <= floor {
                DVector::zeros(n)
            } else {
                let mut system = kernel.clone();
                for i in 0..n {
                    system[(i, i)] += params.regularizer;
                }
                pseudo_solve(system, &residual)?
            };
            residual -= &kernel * &weights;
            layers.push(RbfLayer {
                radius,
                weights: weights.iter().copied().collect(),
            });
        }

        Ok(Self {
            params,
            samples,
            affine,
            layers,
            loo_rms: None,
        })
    }

    pub fn params(&self) -> &RbfHyperparameters {
        &self.params
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Leave-one-out RMS error, if [`Self::validated`] has been run.
    pub fn loo_rms(&self) -> Option<f64> {
        self.loo_rms
    }

    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let mut v = self.affine[0] + self.affine[1] * x + self.affine[2] * y;
        for layer in &self.layers {
            let inv_r2 = 1.0 / (layer.radius * layer.radius);
            for (s, w) in self.samples.iter().zip(&layer.weights) {
                if *w == 0.0 {
                    continue;
                }
                let dx = x - s[0];
                let dy = y - s[1];
                v += w * (-(dx * dx + dy * dy) * inv_r2).exp();
            }
        }
        v
    }

    /// RMS error of predicting each sample from a refit on all the others.
    ///
    /// Refits run in parallel; the result does not depend on scheduling.
    pub fn cross_validate_leave_one_out(&self) -> Result<f64, TrackError> {
        let n = self.samples.len();
        if n < 2 {
            return Err(TrackError::InvalidInput(
                "leave-one-out validation needs at least two samples".into(),
            ));
        }
        let errors: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|held_out| {
                let rest: Vec<[f64; 3]> = self
                    .samples
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != held_out)
                    .map(|(_, s)| *s)
                    .collect();
                let model = Self::fit_samples(rest, self.params)?;
                let s = self.samples[held_out];
                let e = model.evaluate(s[0], s[1]) - s[2];
                Ok(e * e)
            })
            .collect::<Result<_, TrackError>>()?;
        Ok((errors.iter().sum::<f64>() / n as f64).sqrt())
    }

    /// Compute and attach the leave-one-out RMS error.
    pub fn validated(mut self) -> Result<Self, TrackError> {
        self.loo_rms = Some(self.cross_validate_leave_one_out()?);
        Ok(self)
    }
}

fn kernel_matrix(samples: &[[f64; 3]], radius: f64) -> DMatrix<f64> {
    let inv_r2 = 1.0 / (radius * radius);
    DMatrix::from_fn(samples.len(), samples.len(), |i, j| {
        let dx = samples[i][0] - samples[j][0];
        let dy = samples[i][1] - samples[j][1];
        (-(dx * dx + dy * dy) * inv_r2).exp()
    })
}

/// Minimum-norm least-squares solution of `m · x = b`.
fn pseudo_solve(m: DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, TrackError> {
    let cols = m.ncols();
    let svd = m.svd(true, true);
    let max_sv = svd.singular_values.max();
    if !max_sv.is_finite() {
        return Err(TrackError::InvalidInput("RBF system is not finite".into()));
    }
    if max_sv == 0.0 {
        return Ok(DVector::zeros(cols));
    }
    svd.solve(b, max_sv * SVD_REL_TOL)
        .map_err(|e| TrackError::InvalidInput(format!("RBF solve failed: {}", e)))
}
