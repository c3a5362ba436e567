//! camwatch agent: request-driven camera telemetry over HTTP.

pub mod cache;
pub mod config;
pub mod cpu;
pub mod error;
pub mod exposition;
pub mod health;
pub mod http;
pub mod logbuf;
pub mod metrics;
pub mod sampler;
pub mod source;
pub mod state;
pub mod types;
pub mod vapix;
