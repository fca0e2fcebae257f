//! Batch AI transformations over rectangular spreadsheet ranges.
//!
//! A job binds a [`CellRange`](job::CellRange), a named prompt
//! [`Template`](template::Template) and a [`BackendDescriptor`](backend::BackendDescriptor).
//! The [`Engine`] renders one prompt per cell, fans the calls out over a
//! bounded worker pool, retries transient failures with capped exponential
//! backoff, and writes every success back through a [`DataModel`](sink::DataModel).

pub mod backend;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod governor;
pub mod job;
pub mod retry;
pub mod sink;
pub mod template;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, ErrorKind, TemplateError};
pub use job::{CellAddress, CellRange, JobSpec, RunResult};
