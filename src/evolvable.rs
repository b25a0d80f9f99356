use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Bernoulli;
use serde::{Deserialize, Serialize};

/// Affinity of a phage for each bacterial genotype.
///
/// Immutable: every mutation produces a new vector through a [`Mutator`],
/// and every component stays in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitVector {
    vals: Vec<f64>,
}

impl TraitVector {
    /// Create a vector from raw values, constrained by `mutator`.
    pub fn new(vals: Vec<f64>, mutator: &Mutator) -> Self {
        Self {
            vals: mutator.constrain(vals),
        }
    }

    /// Value for genotype `gen_idx`, or NaN if the vector has no such component.
    pub fn get(&self, gen_idx: usize) -> f64 {
        self.vals.get(gen_idx).copied().unwrap_or(f64::NAN)
    }

    pub fn vals(&self) -> &[f64] {
        &self.vals
    }

    /// Return a mutated and constrained copy of this vector.
    pub fn copy_with_mutation<R: Rng + ?Sized>(&self, mutator: &Mutator, rng: &mut R) -> Self {
        let vals = mutator.mutate(&self.vals, rng);
        Self {
            vals: mutator.constrain(vals),
        }
    }
}

/// Upper boundary of the admissible region, as an ordered list of points.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryCurve {
    pnts: Vec<Vec<f64>>,
}

impl BoundaryCurve {
    pub fn new(pnts: Vec<Vec<f64>>) -> Self {
        Self { pnts }
    }

    /// Project `pnt` onto the curve unless it lies strictly below the
    /// nearest curve point in every component.
    ///
    /// Only the single nearest sample is compared, so an admissible point
    /// closer to the curve than the sample spacing can still be moved onto
    /// that sample, raising some of its components.
    fn bound(&self, pnt: Vec<f64>) -> Vec<f64> {
        let nearest = self.pnts.iter().min_by(|a, b| {
            sq_dist(a, &pnt)
                .partial_cmp(&sq_dist(b, &pnt))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        match nearest {
            Some(nearest) if !nearest.iter().zip(&pnt).all(|(c, p)| c > p) => nearest.clone(),
            _ => pnt,
        }
    }
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Mutation kernel shared by every [`TraitVector`] of a run.
#[derive(Debug, Clone)]
pub struct Mutator {
    step: f64,
    mut_dist: Bernoulli,
    boundary: Option<BoundaryCurve>,
}

impl Mutator {
    pub fn new(step: f64, freq: f64, boundary: Option<BoundaryCurve>) -> Result<Self> {
        let mut_dist = Bernoulli::new(freq).context("invalid mutation frequency")?;
        Ok(Self {
            step,
            mut_dist,
            boundary,
        })
    }

    /// Shift each component by `±step` with probability `freq`.
    pub fn mutate<R: Rng + ?Sized>(&self, vals: &[f64], rng: &mut R) -> Vec<f64> {
        vals.iter()
            .map(|&val| {
                if self.mut_dist.sample(rng) {
                    let sign = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
                    val + sign * self.step
                } else {
                    val
                }
            })
            .collect()
    }

    /// Clamp every component to `[0, 1]`, then bound to the curve if there is one.
    pub fn constrain(&self, vals: Vec<f64>) -> Vec<f64> {
        let vals = vals.into_iter().map(|val| val.clamp(0.0, 1.0)).collect();
        match &self.boundary {
            Some(curve) => curve.bound(vals),
            None => vals,
        }
    }
}
