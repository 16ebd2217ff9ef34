mod config;
mod pipeline;
mod reshape;
