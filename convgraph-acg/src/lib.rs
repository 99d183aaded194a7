//! Ancestral conversion graphs for bacterial genomes.
//!
//! An ancestral conversion graph (ACG) is a clonal frame, the tree of
//! vertical descent, decorated with gene-conversion edges that copy a
//! contiguous run of sites from one lineage onto another.
//!
//! - **Graph model** — [`ClonalFrame`], [`ConversionGraph`], and the derived
//!   clonal-frame events, site regions and marginal trees
//! - **Coalescent prior** — [`AcgCoalescent`], an approximate coalescent with
//!   gene conversion for any [`PopulationFunction`]
//! - **Proposals** — [`ConversionSwapOperator`], the reversible create/delete
//!   move, and the [`ConversionSampler`] it draws from
//! - **Formats** — extended Newick with one record per conversion
//! - **Simulation and inference** — forward simulation and a
//!   Metropolis-Hastings driver

pub mod chain;
pub mod clonal_frame;
pub mod coalescent;
pub mod config;
pub mod events;
pub mod graph;
pub mod marginal;
pub mod newick;
pub mod operator;
pub mod population;
pub mod region;
pub mod sampling;
pub mod simulation;

pub use chain::{run_chain, ChainConfig, ChainResult, ChainSample, FlatLikelihood, LogLikelihood};
pub use clonal_frame::{ClonalFrame, Node, NodeId};
pub use coalescent::{attachment_log_density, AcgCoalescent, CoalescentParams};
pub use config::ModelConfig;
pub use events::{CfEvent, CfEventKind};
pub use graph::{Conversion, ConversionGraph, LineageSwap, Locus, LocusId};
pub use marginal::{MarginalNode, MarginalTree};
pub use operator::{ConversionSwapOperator, MoveKind, Proposal, Rejection};
pub use population::{ConstantPopulation, ExponentialGrowth, PopulationFunction, PopulationModel};
pub use region::Region;
pub use sampling::{AffectedRegion, Attachment, ConversionSampler};
pub use simulation::{simulate_acg, simulate_clonal_frame};
