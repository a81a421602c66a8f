//! Run configuration: YAML loading, per-run overrides, and validation.

pub mod parser;
pub mod provider;
pub mod types;
pub mod validator;

pub use provider::ConfigProvider;
pub use types::RunConfig;
