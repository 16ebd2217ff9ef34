//! Pipeline configuration.
//!
//! Typed configuration with bon builders and environment variable fallbacks.

use bon::bon;
use enumset::EnumSet;

use crate::fusion::FusionFamily;

/// Parses a `GRAFT_FUSIONS` value.
pub fn parse_fusions(value: &str) -> Option<EnumSet<FusionFamily>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "none" | "0" => Some(EnumSet::empty()),
        "regular" => Some(FusionFamily::Regular.into()),
        "differentiable" => Some(FusionFamily::Differentiable.into()),
        "all" | "1" => Some(EnumSet::all()),
        _ => None,
    }
}

/// Which passes the default [`Pipeline`](crate::Pipeline) runs and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Fusion families applied by the fusion pass. Selecting
    /// [`FusionFamily::Differentiable`] also registers the fused gradients.
    pub fusions: EnumSet<FusionFamily>,
    /// Smallest loop kernel the partitioner keeps.
    pub min_fuse_size: usize,
    /// Run LSTM, RNN and projection fusion.
    pub recurrent: bool,
    /// Run reshape elimination first.
    pub reshape_elimination: bool,
    /// Fewest chained cells or projections worth fusing into one node.
    pub min_timesteps: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fusions: FusionFamily::Regular.into(),
            min_fuse_size: 3,
            recurrent: true,
            reshape_elimination: true,
            min_timesteps: 2,
        }
    }
}

#[bon]
impl PipelineConfig {
    /// Create a pipeline configuration with builder pattern.
    #[builder]
    pub fn builder(
        #[builder(default = EnumSet::only(FusionFamily::Regular))] fusions: EnumSet<FusionFamily>,
        #[builder(default = 3)] min_fuse_size: usize,
        #[builder(default = true)] recurrent: bool,
        #[builder(default = true)] reshape_elimination: bool,
        #[builder(default = 2)] min_timesteps: usize,
    ) -> Self {
        Self { fusions, min_fuse_size, recurrent, reshape_elimination, min_timesteps }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `GRAFT_FUSIONS` - `none`, `regular`, `differentiable` or `all` (default: `regular`)
    /// * `GRAFT_MIN_FUSE` - Smallest loop kernel kept (default: 3)
    /// * `GRAFT_RECURRENT=0` - Disable recurrent fusion
    /// * `GRAFT_RESHAPE_ELIM=0` - Disable reshape elimination
    /// * `GRAFT_MIN_TIMESTEPS` - Fewest timesteps fused into one node (default: 2)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let fusions = match std::env::var("GRAFT_FUSIONS") {
            Ok(value) => parse_fusions(&value).unwrap_or_else(|| {
                tracing::warn!(%value, "unrecognized GRAFT_FUSIONS, using default");
                defaults.fusions
            }),
            Err(_) => defaults.fusions,
        };
        let min_fuse_size =
            std::env::var("GRAFT_MIN_FUSE").ok().and_then(|s| s.parse().ok()).unwrap_or(defaults.min_fuse_size);
        let recurrent = std::env::var("GRAFT_RECURRENT").map_or(defaults.recurrent, |s| s != "0");
        let reshape_elimination =
            std::env::var("GRAFT_RESHAPE_ELIM").map_or(defaults.reshape_elimination, |s| s != "0");
        let min_timesteps = std::env::var("GRAFT_MIN_TIMESTEPS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n: &usize| n >= 1)
            .unwrap_or(defaults.min_timesteps);

        Self { fusions, min_fuse_size, recurrent, reshape_elimination, min_timesteps }
    }
}
