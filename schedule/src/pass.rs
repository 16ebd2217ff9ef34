//! Ordered pass pipeline.
//!
//! Each pass is one sweep over the graph. Earlier passes create the shapes
//! later ones look for: reshape elimination exposes plain dots and pads to
//! fusion, LSTM fusion creates the cells RNN fusion chains.

use graft_ir::{Graph, PassReport, Result};

use crate::config::PipelineConfig;
use crate::fusion::FusionPass;
use crate::reshape::ReshapeElimination;
use crate::rnn::{LstmFusion, RnnFusion, RnnMatFusion};

/// One rewrite pass over a graph.
pub trait GraphPass {
    fn name(&self) -> &str;

    /// Sweeps `graph` once.
    fn run(&self, graph: &mut Graph) -> Result<PassReport>;
}

/// Passes run in insertion order, each to completion.
#[derive(Default)]
pub struct Pipeline {
    passes: Vec<Box<dyn GraphPass>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard pass order for `config`: reshape elimination, LSTM cell,
    /// RNN layer and projection fusion, then the selected fusion families.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut pipeline = Self::new();
        if config.reshape_elimination {
            pipeline.push(ReshapeElimination::new()?);
        }
        if config.recurrent {
            pipeline.push(LstmFusion::new()?);
            pipeline.push(RnnFusion::new(config.min_timesteps));
            pipeline.push(RnnMatFusion::new(config.min_timesteps)?);
        }
        if !config.fusions.is_empty() {
            pipeline.push(FusionPass::new(config.fusions)?);
        }
        Ok(pipeline)
    }

    pub fn push(&mut self, pass: impl GraphPass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs every pass once and merges their reports.
    #[tracing::instrument(skip_all, fields(passes = self.passes.len()))]
    pub fn run(&self, graph: &mut Graph) -> Result<PassReport> {
        let mut report = PassReport::default();
        for pass in &self.passes {
            let pass_report = pass.run(graph)?;
            tracing::debug!(
                pass = pass.name(),
                applied = pass_report.applied_count(),
                rejected = pass_report.rejected.len(),
                pruned = pass_report.pruned,
                "pass complete"
            );
            report.merge(pass_report);
        }
        tracing::trace!(graph.tree = %graph.tree(), "pipeline complete");
        Ok(report)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("passes", &self.names()).finish()
    }
}
