//! Approximate coalescent with gene conversion.
//!
//! The prior density of an ACG factorises into four additive log terms:
//!
//! 1. a hard bound on the number of conversions;
//! 2. the standard coalescent density of the clonal frame;
//! 3. a Poisson density for the conversion count, with mean
//!    `ρ · L_cf · (T + n_loci · δ)`;
//! 4. for every conversion, the density of its departure point (uniform on
//!    the clonal frame), its arrival (coalescence with the extant clonal-frame
//!    lineages), and its affected sites (geometric tract of mean `δ`).
//!
//! Evaluation is always from scratch. A single topology move can shift every
//! interval boundary, so nothing is cached between calls.

use convgraph_core::{ConvGraphError, Result};

use crate::events::{interval_index, CfEvent, CfEventKind};
use crate::graph::{Conversion, ConversionGraph};
use crate::population::PopulationFunction;

/// Rate and bound parameters of the conversion process.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoalescentParams {
    /// Conversion rate per site per unit branch length.
    pub rho: f64,
    /// Mean tract length, in sites.
    pub delta: f64,
    pub lower_conv_count: usize,
    pub upper_conv_count: usize,
}

impl CoalescentParams {
    /// Parameters with the conversion count unbounded.
    pub fn new(rho: f64, delta: f64) -> Self {
        Self {
            rho,
            delta,
            lower_conv_count: 0,
            upper_conv_count: usize::MAX,
        }
    }

    pub fn with_bounds(mut self, lower: usize, upper: usize) -> Self {
        self.lower_conv_count = lower;
        self.upper_conv_count = upper;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.rho.is_finite() && self.rho >= 0.0) {
            return Err(ConvGraphError::Config(format!(
                "rho must be finite and non-negative, got {}",
                self.rho
            )));
        }
        validate_delta(self.delta)?;
        if self.lower_conv_count > self.upper_conv_count {
            return Err(ConvGraphError::Config(format!(
                "conversion count bounds [{}, {}] are empty",
                self.lower_conv_count, self.upper_conv_count
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_delta(delta: f64) -> Result<()> {
    if !(delta.is_finite() && delta >= 1.0) {
        return Err(ConvGraphError::Config(format!(
            "tract length delta must be finite and >= 1, got {delta}"
        )));
    }
    Ok(())
}

/// Prior density evaluator for conversion graphs.
#[derive(Debug, Clone)]
pub struct AcgCoalescent<P> {
    population: P,
    params: CoalescentParams,
}

impl<P: PopulationFunction> AcgCoalescent<P> {
    pub fn new(population: P, params: CoalescentParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { population, params })
    }

    pub fn population(&self) -> &P {
        &self.population
    }

    pub fn params(&self) -> &CoalescentParams {
        &self.params
    }

    /// Log prior density of `graph`; `-∞` when the graph is impossible.
    pub fn log_density(&self, graph: &ConversionGraph) -> f64 {
        let count = graph.total_conv_count();
        if count < self.params.lower_conv_count || count > self.params.upper_conv_count {
            return f64::NEG_INFINITY;
        }

        let events = graph.cf_events();
        let mut log_p = self.clonal_frame_term(&events);

        let count_term = self.conversion_count_log_density(graph);
        if count_term == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }
        log_p += count_term;

        let cf_length = graph.clonal_frame_length();
        for conv in graph.conversions() {
            log_p += self.conversion_term(graph, &events, cf_length, conv);
        }
        log_p
    }

    /// Coalescent density of the clonal frame alone.
    pub fn clonal_frame_log_density(&self, graph: &ConversionGraph) -> f64 {
        self.clonal_frame_term(&graph.cf_events())
    }

    /// Poisson log density of the conversion count (without the `1/n!`,
    /// which cancels against the conversions' exchangeability).
    pub fn conversion_count_log_density(&self, graph: &ConversionGraph) -> f64 {
        let count = graph.total_conv_count();
        if self.params.rho > 0.0 {
            let mean = self.params.rho
                * graph.clonal_frame_length()
                * (graph.total_sequence_length() as f64
                    + graph.loci().len() as f64 * self.params.delta);
            -mean + count as f64 * mean.ln()
        } else if count > 0 {
            f64::NEG_INFINITY
        } else {
            0.0
        }
    }

    /// Log density of a single conversion given the clonal frame.
    pub fn conversion_log_density(&self, graph: &ConversionGraph, conv: &Conversion) -> f64 {
        let events = graph.cf_events();
        self.conversion_term(graph, &events, graph.clonal_frame_length(), conv)
    }

    fn clonal_frame_term(&self, events: &[CfEvent]) -> f64 {
        let mut log_p = 0.0;
        for pair in events.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let k = a.lineage_count as f64;
            log_p += -0.5 * k * (k - 1.0) * self.population.integral(a.height, b.height);
            if b.kind == CfEventKind::Coalescence {
                log_p -= self.population.pop_size(b.height).ln();
            }
        }
        log_p
    }

    fn conversion_term(
        &self,
        graph: &ConversionGraph,
        events: &[CfEvent],
        cf_length: f64,
        conv: &Conversion,
    ) -> f64 {
        attachment_log_density(&self.population, events, cf_length, conv)
            + self.site_log_density(graph, conv)
    }

    /// Start- and end-site density of a conversion's tract.
    fn site_log_density(&self, graph: &ConversionGraph, conv: &Conversion) -> f64 {
        let delta = self.params.delta;
        let norm = graph.loci().len() as f64 * delta + graph.total_sequence_length() as f64;

        let mut log_p = if conv.start_site == 0 {
            ((delta + 1.0) / norm).ln()
        } else {
            (1.0 / norm).ln()
        };

        let site_count = graph.locus(conv.locus).map_or(0, |l| l.site_count());
        let q = 1.0 - 1.0 / delta;
        let mut prob_end = q.powf((conv.end_site - conv.start_site) as f64) / delta;
        if conv.end_site + 1 == site_count {
            prob_end += q.powf((site_count - 1 - conv.start_site) as f64);
        }
        log_p += prob_end.ln();
        log_p
    }
}

/// Density of a conversion's departure and arrival points.
///
/// The departure is uniform over the clonal frame (`1 / cf_length`). From
/// there the lineage coalesces back at rate `k(t)/N(t)` with the `k(t)`
/// extant clonal-frame lineages, each equally likely, so the arrival density
/// on one particular branch at `height2` is `exp(-∫ k/N) / N(height2)`.
pub fn attachment_log_density<P: PopulationFunction + ?Sized>(
    population: &P,
    events: &[CfEvent],
    cf_length: f64,
    conv: &Conversion,
) -> f64 {
    let (h1, h2) = (conv.height1, conv.height2);
    let mut log_p = -cf_length.ln();

    let start = interval_index(events, h1);
    for (i, event) in events.iter().enumerate().skip(start) {
        if event.height >= h2 {
            break;
        }
        let t0 = event.height.max(h1);
        let t1 = events.get(i + 1).map_or(h2, |next| next.height.min(h2));
        log_p -= event.lineage_count as f64 * population.integral(t0, t1);
    }

    log_p - population.pop_size(h2).ln()
}
