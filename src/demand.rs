use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson as PoissonSampler};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Discrete, Poisson};

use crate::error::{RentalError, Result};

/// Expected number of requests and returns per day at each location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    /// Expected number of cars requested each day at location #1
    pub rent_mean1: f64,
    /// Expected number of cars returned each day at location #1
    pub return_mean1: f64,
    /// Expected number of cars requested each day at location #2
    pub rent_mean2: f64,
    /// Expected number of cars returned each day at location #2
    pub return_mean2: f64,
}

impl Rates {
    pub fn new(rent_mean1: f64, return_mean1: f64, rent_mean2: f64, return_mean2: f64) -> Rates {
        Rates { rent_mean1, return_mean1, rent_mean2, return_mean2 }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("rent_mean1", self.rent_mean1),
            ("return_mean1", self.return_mean1),
            ("rent_mean2", self.rent_mean2),
            ("return_mean2", self.return_mean2),
        ] {
            check_rate(field, value)?;
        }
        Ok(())
    }
}

fn check_rate(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(RentalError::InvalidParameter {
            field,
            value,
            reason: "Poisson rate must be finite and non-negative",
        });
    }
    Ok(())
}

/// The number of cars requested and returned at each site during a day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Demand {
    pub x1: u32,  // Cars requested at site #1
    pub y1: u32,  // Cars returned at site #1
    pub x2: u32,  // Cars requested at site #2
    pub y2: u32,  // Cars returned at site #2
}

impl Demand {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Demand {
        Demand { x1, y1, x2, y2 }
    }
}

/// Source of daily customer activity.
pub trait DemandModel {
    fn sample(&mut self) -> Demand;
}

/// A fixed demand repeats the same day forever.
impl DemandModel for Demand {
    fn sample(&mut self) -> Demand {
        *self
    }
}

/// Draws requests and returns from four independent Poisson distributions.
pub struct Customers {
    rng: StdRng,
    // None for a zero rate, which always yields zero cars.
    x1: Option<PoissonSampler<f64>>,
    y1: Option<PoissonSampler<f64>>,
    x2: Option<PoissonSampler<f64>>,
    y2: Option<PoissonSampler<f64>>,
}

impl Customers {
    pub fn new(rates: Rates, seed: Option<u64>) -> Result<Customers> {
        rates.validate()?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Customers {
            rng,
            x1: Customers::sampler("rent_mean1", rates.rent_mean1)?,
            y1: Customers::sampler("return_mean1", rates.return_mean1)?,
            x2: Customers::sampler("rent_mean2", rates.rent_mean2)?,
            y2: Customers::sampler("return_mean2", rates.return_mean2)?,
        })
    }

    fn sampler(field: &'static str, mean: f64) -> Result<Option<PoissonSampler<f64>>> {
        if mean == 0.0 {
            return Ok(None);
        }
        PoissonSampler::new(mean)
            .map(Some)
            .map_err(|_| RentalError::InvalidParameter {
                field,
                value: mean,
                reason: "Poisson rate must be finite and non-negative",
            })
    }

    fn draw(rng: &mut StdRng, dist: &Option<PoissonSampler<f64>>) -> u32 {
        match dist {
            Some(dist) => dist.sample(rng) as u32,
            None => 0,
        }
    }
}

impl DemandModel for Customers {
    fn sample(&mut self) -> Demand {
        Demand {
            x1: Customers::draw(&mut self.rng, &self.x1),
            y1: Customers::draw(&mut self.rng, &self.y1),
            x2: Customers::draw(&mut self.rng, &self.x2),
            y2: Customers::draw(&mut self.rng, &self.y2),
        }
    }
}

/// Poisson probabilities for counts `0..bound`, precalculated when constructed.
///
/// Mass beyond the bound is dropped, not folded into the last entry, so the
/// table sums to slightly less than one.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncatedPoisson {
    pub mean: f64,
    probs: Vec<f64>,
}

impl TruncatedPoisson {
    pub fn new(field: &'static str, mean: f64, bound: usize) -> Result<TruncatedPoisson> {
        check_rate(field, mean)?;
        if bound == 0 {
            return Err(RentalError::InvalidParameter {
                field: "truncation",
                value: 0.0,
                reason: "truncation bound must be at least 1",
            });
        }
        let probs = if mean == 0.0 {
            // Degenerate distribution: all mass at zero.
            let mut probs = vec![0.0; bound];
            probs[0] = 1.0;
            probs
        } else {
            let dist = Poisson::new(mean).map_err(|_| RentalError::InvalidParameter {
                field,
                value: mean,
                reason: "Poisson rate must be finite and non-negative",
            })?;
            (0..bound as u64).map(|k| dist.pmf(k)).collect()
        };
        Ok(TruncatedPoisson { mean, probs })
    }

    /// Probability of exactly `k` events; zero outside the truncation range.
    pub fn pmf(&self, k: usize) -> f64 {
        self.probs.get(k).copied().unwrap_or(0.0)
    }

    /// Truncation bound `K`; counts run over `0..K`.
    pub fn bound(&self) -> usize {
        self.probs.len()
    }

    /// Probability mass retained by the truncation.
    pub fn mass(&self) -> f64 {
        self.probs.iter().sum()
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }
}
