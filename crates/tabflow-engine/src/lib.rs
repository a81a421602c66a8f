//! Configuration-driven tabular pipeline engine.
//!
//! A run loads inputs into a [`VariableStore`], runs the configured modules
//! through an execution strategy, and writes outputs back out. The
//! [`Orchestrator`] drives one run per call.

pub mod arrow_utils;
pub mod config;
pub mod error;
pub mod execution;
pub mod io;
pub mod managers;
pub mod module;
pub mod modules;
pub mod orchestrator;
pub mod registry;
pub mod resolve;
pub mod result;
pub mod variables;

pub use config::{ConfigProvider, RunConfig};
pub use error::{AdapterError, PipelineError, ResolveError};
pub use module::{factory, Module, ModuleContext, ModuleFactory};
pub use orchestrator::Orchestrator;
pub use registry::Registry;
pub use result::{CheckResult, RunOutcome};
pub use variables::{Variable, VariableStore};
