//! Rewrite passes, autodiff and loop-kernel partitioning for graft graphs.
//!
//! # Module Organization
//!
//! - [`fusion`] - Regular and differentiable fusion rule families
//! - [`reshape`] - Reshape and transpose elimination
//! - [`rnn`] - LSTM cell, multi-timestep RNN and batched projection fusion
//! - [`pass`] - The [`GraphPass`] trait and the ordered [`Pipeline`]
//! - [`config`] - Pipeline configuration with env-var fallbacks
//! - [`autodiff`] - Reverse-mode adjoint propagation and gradient rules
//! - [`partition`] - Elementwise loop-kernel partitioning
//!
//! # Pattern Matching and Rewriting
//!
//! The matcher and the sweep driver live in `graft_ir::pattern` and
//! `graft_ir::rewrite`; they are re-exported here.

pub mod autodiff;
pub mod config;
pub mod fusion;
pub mod partition;
pub mod pass;
pub mod reshape;
pub mod rnn;

#[cfg(test)]
pub mod test;

pub use graft_ir::pattern;
pub use graft_ir::rewrite;

pub use autodiff::{GradientFn, GradientRegistry, backprop, backprop_function};
pub use config::PipelineConfig;
pub use fusion::{FusionFamily, FusionPass, FusionRule};
pub use partition::{LoopKernel, LoopKernelCollector};
pub use pass::{GraphPass, Pipeline};
pub use reshape::ReshapeElimination;
pub use rnn::{LstmFusion, RnnFusion, RnnMatFusion};
