//! Population-size functions for the coalescent.
//!
//! The coalescent needs the inverse population size integrated over time.
//! Each model exposes it through its *intensity* `I(t) = ∫_0^t N(s)^{-1} ds`
//! and the inverse of that map, which lets samplers draw coalescence times
//! by transforming unit exponentials.

use convgraph_core::{ConvGraphError, Result};

/// A deterministic population-size trajectory `N(t)`, `t` measured into the past.
pub trait PopulationFunction: std::fmt::Debug + Send + Sync {
    /// Effective population size at time `t`.
    fn pop_size(&self, t: f64) -> f64;

    /// `∫_0^t N(s)^{-1} ds`.
    fn intensity(&self, t: f64) -> f64;

    /// Inverse of [`PopulationFunction::intensity`]; `+∞` when the intensity
    /// never reaches `x`.
    fn inverse_intensity(&self, x: f64) -> f64;

    /// `∫_{t0}^{t1} N(s)^{-1} ds`.
    fn integral(&self, t0: f64, t1: f64) -> f64 {
        self.intensity(t1) - self.intensity(t0)
    }
}

/// Constant population size.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstantPopulation {
    pub pop_size: f64,
}

impl ConstantPopulation {
    pub fn new(pop_size: f64) -> Result<Self> {
        let pop = Self { pop_size };
        pop.validate()?;
        Ok(pop)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pop_size.is_finite() && self.pop_size > 0.0) {
            return Err(ConvGraphError::Config(format!(
                "population size must be positive and finite, got {}",
                self.pop_size
            )));
        }
        Ok(())
    }
}

impl PopulationFunction for ConstantPopulation {
    fn pop_size(&self, _t: f64) -> f64 {
        self.pop_size
    }

    fn intensity(&self, t: f64) -> f64 {
        t / self.pop_size
    }

    fn inverse_intensity(&self, x: f64) -> f64 {
        x * self.pop_size
    }

    fn integral(&self, t0: f64, t1: f64) -> f64 {
        (t1 - t0) / self.pop_size
    }
}

/// Exponential growth: `N(t) = N0 · exp(-r·t)`.
///
/// With `r > 0` the population was smaller in the past.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExponentialGrowth {
    pub pop_size: f64,
    pub growth_rate: f64,
}

/// Below this magnitude the growth rate is treated as zero.
const GROWTH_EPS: f64 = 1e-12;

impl ExponentialGrowth {
    pub fn new(pop_size: f64, growth_rate: f64) -> Result<Self> {
        let pop = Self {
            pop_size,
            growth_rate,
        };
        pop.validate()?;
        Ok(pop)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pop_size.is_finite() && self.pop_size > 0.0) {
            return Err(ConvGraphError::Config(format!(
                "population size must be positive and finite, got {}",
                self.pop_size
            )));
        }
        if !self.growth_rate.is_finite() {
            return Err(ConvGraphError::Config(format!(
                "growth rate must be finite, got {}",
                self.growth_rate
            )));
        }
        Ok(())
    }
}

impl PopulationFunction for ExponentialGrowth {
    fn pop_size(&self, t: f64) -> f64 {
        self.pop_size * (-self.growth_rate * t).exp()
    }

    fn intensity(&self, t: f64) -> f64 {
        let r = self.growth_rate;
        if r.abs() < GROWTH_EPS {
            t / self.pop_size
        } else {
            (r * t).exp_m1() / (self.pop_size * r)
        }
    }

    fn inverse_intensity(&self, x: f64) -> f64 {
        let r = self.growth_rate;
        if r.abs() < GROWTH_EPS {
            return x * self.pop_size;
        }
        let arg = x * self.pop_size * r;
        if arg <= -1.0 {
            // Shrinking-backwards populations have bounded total intensity.
            f64::INFINITY
        } else {
            arg.ln_1p() / r
        }
    }
}

/// Population model selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "model", rename_all = "snake_case"))]
pub enum PopulationModel {
    Constant(ConstantPopulation),
    ExponentialGrowth(ExponentialGrowth),
}

impl PopulationModel {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Constant(p) => p.validate(),
            Self::ExponentialGrowth(p) => p.validate(),
        }
    }
}

impl PopulationFunction for PopulationModel {
    fn pop_size(&self, t: f64) -> f64 {
        match self {
            Self::Constant(p) => p.pop_size(t),
            Self::ExponentialGrowth(p) => p.pop_size(t),
        }
    }

    fn intensity(&self, t: f64) -> f64 {
        match self {
            Self::Constant(p) => p.intensity(t),
            Self::ExponentialGrowth(p) => p.intensity(t),
        }
    }

    fn inverse_intensity(&self, x: f64) -> f64 {
        match self {
            Self::Constant(p) => p.inverse_intensity(x),
            Self::ExponentialGrowth(p) => p.inverse_intensity(x),
        }
    }

    fn integral(&self, t0: f64, t1: f64) -> f64 {
        match self {
            Self::Constant(p) => p.integral(t0, t1),
            Self::ExponentialGrowth(p) => p.integral(t0, t1),
        }
    }
}

impl From<ConstantPopulation> for PopulationModel {
    fn from(p: ConstantPopulation) -> Self {
        Self::Constant(p)
    }
}

impl From<ExponentialGrowth> for PopulationModel {
    fn from(p: ExponentialGrowth) -> Self {
        Self::ExponentialGrowth(p)
    }
}
