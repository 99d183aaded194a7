//! Model configuration.
//!
//! Every field is optional so that partially filled configurations (from
//! JSON, say) can be merged before use; missing required values surface as
//! [`ConvGraphError::Config`] when the model is built.

use convgraph_core::{ConvGraphError, Result};

use crate::chain::ChainConfig;
use crate::coalescent::{AcgCoalescent, CoalescentParams};
use crate::operator::ConversionSwapOperator;
use crate::population::PopulationModel;
use crate::sampling::ConversionSampler;

/// Configuration of the conversion model and chain.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ModelConfig {
    pub population: Option<PopulationModel>,
    pub rho: Option<f64>,
    pub delta: Option<f64>,
    pub lower_conv_count: Option<usize>,
    pub upper_conv_count: Option<usize>,
    pub chain: ChainConfig,
}

impl ModelConfig {
    pub fn population(&self) -> Result<PopulationModel> {
        let population = self
            .population
            .ok_or_else(|| ConvGraphError::Config("population model is not set".into()))?;
        population.validate()?;
        Ok(population)
    }

    /// Coalescent parameters; count bounds default to `[0, usize::MAX]`.
    pub fn params(&self) -> Result<CoalescentParams> {
        let rho = self
            .rho
            .ok_or_else(|| ConvGraphError::Config("conversion rate rho is not set".into()))?;
        let delta = self
            .delta
            .ok_or_else(|| ConvGraphError::Config("tract length delta is not set".into()))?;
        let params = CoalescentParams::new(rho, delta).with_bounds(
            self.lower_conv_count.unwrap_or(0),
            self.upper_conv_count.unwrap_or(usize::MAX),
        );
        params.validate()?;
        Ok(params)
    }

    pub fn coalescent(&self) -> Result<AcgCoalescent<PopulationModel>> {
        AcgCoalescent::new(self.population()?, self.params()?)
    }

    pub fn operator(&self) -> Result<ConversionSwapOperator<PopulationModel>> {
        let sampler = ConversionSampler::new(self.population()?, self.params()?.delta)?;
        Ok(ConversionSwapOperator::new(sampler))
    }

    /// Check that every part of the configuration can be built.
    pub fn validate(&self) -> Result<()> {
        self.population()?;
        self.params()?;
        self.chain.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::{ConstantPopulation, ExponentialGrowth};

    fn complete() -> ModelConfig {
        ModelConfig {
            population: Some(ConstantPopulation::new(1.0).unwrap().into()),
            rho: Some(0.01),
            delta: Some(500.0),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn complete_config_builds() {
        let config = complete();
        config.validate().unwrap();
        let c = config.coalescent().unwrap();
        assert_eq!(c.params().upper_conv_count, usize::MAX);
        assert_eq!(config.operator().unwrap().sampler().delta(), 500.0);
    }

    #[test]
    fn missing_values_are_config_errors() {
        for config in [
            ModelConfig { population: None, ..complete() },
            ModelConfig { rho: None, ..complete() },
            ModelConfig { delta: None, ..complete() },
        ] {
            assert!(matches!(config.validate(), Err(ConvGraphError::Config(_))));
        }
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let bad_pop = ModelConfig {
            population: Some(PopulationModel::ExponentialGrowth(ExponentialGrowth {
                pop_size: -1.0,
                growth_rate: 0.1,
            })),
            ..complete()
        };
        let bad_bounds = ModelConfig {
            lower_conv_count: Some(10),
            upper_conv_count: Some(2),
            ..complete()
        };
        let bad_delta = ModelConfig {
            delta: Some(0.25),
            ..complete()
        };
        for config in [bad_pop, bad_bounds, bad_delta] {
            assert!(matches!(config.coalescent(), Err(ConvGraphError::Config(_))));
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_partial_json() {
        let json = r#"{
            "population": {"model": "exponential_growth", "pop_size": 2.0, "growth_rate": 0.5},
            "rho": 0.02,
            "delta": 300.0,
            "chain": {"n_steps": 500}
        }"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chain.n_steps, 500);
        assert_eq!(config.chain.seed, ChainConfig::default().seed);
        assert_eq!(config.upper_conv_count, None);

        let back: ModelConfig = serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
