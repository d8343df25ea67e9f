//! Scoring functions for knowledge graph embeddings
//!
//! | Geometry    | Model    | Entity width | Relation width |
//! |-------------|----------|--------------|----------------|
//! | Translation | TransE   | d            | d              |
//! | Bilinear    | DistMult | d            | d              |
//! | Rotation    | RotatE   | 2d (re, im)  | d (phases)     |
//!
//! Every score is a function of the three vectors only, higher means more
//! plausible, and comes with an analytic gradient used by the trainer.

use ndarray::{Array2, ArrayView1, ArrayViewMut1};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt;

/// Guards the norm in distance-based gradients
const NORM_EPS: f32 = 1e-9;

/// Triple scoring function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScoringFunction {
    /// -||h + r - t||
    #[default]
    TransE,
    /// sum(h * r * t)
    ///
    /// Symmetric in head and tail.
    DistMult,
    /// -||h ∘ e^{iθ} - t|| in complex space; entities interleave (re, im)
    RotatE,
}

impl ScoringFunction {
    /// Row width of the entity table for embedding dimension `dim`
    pub fn entity_width(&self, dim: usize) -> usize {
        match self {
            ScoringFunction::RotatE => 2 * dim,
            _ => dim,
        }
    }

    /// Row width of the relation table for embedding dimension `dim`
    pub fn relation_width(&self, dim: usize) -> usize {
        dim
    }

    /// Whether entity rows are kept on the unit sphere during training
    pub fn normalizes_entities(&self) -> bool {
        matches!(self, ScoringFunction::TransE)
    }

    /// Plausibility of (h, r, t)
    pub fn score(&self, h: ArrayView1<f32>, r: ArrayView1<f32>, t: ArrayView1<f32>) -> f32 {
        match self {
            ScoringFunction::TransE => {
                let sq: f32 = h
                    .iter()
                    .zip(r.iter())
                    .zip(t.iter())
                    .map(|((&h, &r), &t)| {
                        let d = h + r - t;
                        d * d
                    })
                    .sum();
                -sq.sqrt()
            }
            ScoringFunction::DistMult => h
                .iter()
                .zip(r.iter())
                .zip(t.iter())
                .map(|((&h, &r), &t)| h * r * t)
                .sum(),
            ScoringFunction::RotatE => {
                let mut sq = 0.0f32;
                for (i, &theta) in r.iter().enumerate() {
                    let (s, c) = theta.sin_cos();
                    let (h_re, h_im) = (h[2 * i], h[2 * i + 1]);
                    let e_re = h_re * c - h_im * s - t[2 * i];
                    let e_im = h_re * s + h_im * c - t[2 * i + 1];
                    sq += e_re * e_re + e_im * e_im;
                }
                -sq.sqrt()
            }
        }
    }

    /// Add `coeff * ∂score/∂x` into the gradient buffers of h, r and t.
    pub fn accumulate_gradients(
        &self,
        h: ArrayView1<f32>,
        r: ArrayView1<f32>,
        t: ArrayView1<f32>,
        coeff: f32,
        gh: &mut [f32],
        gr: &mut [f32],
        gt: &mut [f32],
    ) {
        match self {
            ScoringFunction::TransE => {
                let diff: Vec<f32> = h
                    .iter()
                    .zip(r.iter())
                    .zip(t.iter())
                    .map(|((&h, &r), &t)| h + r - t)
                    .collect();
                let norm = diff.iter().map(|d| d * d).sum::<f32>().sqrt().max(NORM_EPS);
                for (i, d) in diff.iter().enumerate() {
                    let g = coeff * d / norm;
                    gh[i] -= g;
                    gr[i] -= g;
                    gt[i] += g;
                }
            }
            ScoringFunction::DistMult => {
                for i in 0..h.len() {
                    gh[i] += coeff * r[i] * t[i];
                    gr[i] += coeff * h[i] * t[i];
                    gt[i] += coeff * h[i] * r[i];
                }
            }
            ScoringFunction::RotatE => {
                let dim = r.len();
                let mut rotated = Vec::with_capacity(2 * dim);
                let mut error = Vec::with_capacity(2 * dim);
                for (i, &theta) in r.iter().enumerate() {
                    let (s, c) = theta.sin_cos();
                    let (h_re, h_im) = (h[2 * i], h[2 * i + 1]);
                    let rot_re = h_re * c - h_im * s;
                    let rot_im = h_re * s + h_im * c;
                    rotated.push((rot_re, rot_im, s, c));
                    error.push(rot_re - t[2 * i]);
                    error.push(rot_im - t[2 * i + 1]);
                }
                let norm = error.iter().map(|e| e * e).sum::<f32>().sqrt().max(NORM_EPS);

                for (i, &(rot_re, rot_im, s, c)) in rotated.iter().enumerate() {
                    // ∂score/∂rotated
                    let g_re = -error[2 * i] / norm;
                    let g_im = -error[2 * i + 1] / norm;

                    gh[2 * i] += coeff * (g_re * c + g_im * s);
                    gh[2 * i + 1] += coeff * (-g_re * s + g_im * c);
                    gr[i] += coeff * (-g_re * rot_im + g_im * rot_re);
                    gt[2 * i] -= coeff * g_re;
                    gt[2 * i + 1] -= coeff * g_im;
                }
            }
        }
    }

    /// Freshly initialised entity table
    pub fn init_entities<R: Rng + ?Sized>(&self, count: usize, dim: usize, rng: &mut R) -> Array2<f32> {
        let bound = 6.0 / (dim.max(1) as f32).sqrt();
        let mut table = Array2::from_shape_fn((count, self.entity_width(dim)), |_| rng.gen_range(-bound..bound));
        if self.normalizes_entities() {
            for row in table.rows_mut() {
                normalize(row);
            }
        }
        table
    }

    /// Freshly initialised relation table
    pub fn init_relations<R: Rng + ?Sized>(&self, count: usize, dim: usize, rng: &mut R) -> Array2<f32> {
        let width = self.relation_width(dim);
        match self {
            ScoringFunction::RotatE => Array2::from_shape_fn((count, width), |_| rng.gen_range(-PI..PI)),
            _ => {
                let bound = 6.0 / (dim.max(1) as f32).sqrt();
                Array2::from_shape_fn((count, width), |_| rng.gen_range(-bound..bound))
            }
        }
    }
}

impl fmt::Display for ScoringFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScoringFunction::TransE => "TransE",
            ScoringFunction::DistMult => "DistMult",
            ScoringFunction::RotatE => "RotatE",
        };
        write!(f, "{}", name)
    }
}

/// Scale a row to unit L2 norm (zero rows are left alone)
pub(crate) fn normalize(mut row: ArrayViewMut1<f32>) {
    let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > NORM_EPS {
        row.mapv_inplace(|x| x / norm);
    }
}
