//! querytap - SQL query execution profiler
//!
//! This library observes statements a database layer executes, groups them
//! by normalized shape and reports count and timing statistics for each
//! caller-defined profiling scope, with N+1 pattern detection on top.

pub mod accumulator;
pub mod anti_patterns;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod hook;
pub mod normalizer;
pub mod profiler;
pub mod registry;
pub mod replay;
pub mod report;
pub mod session;
pub mod stats;

pub use error::{ProfilerError, Result};
pub use profiler::Profiler;
