//! Built-in modules available to every configuration.

mod batch;
mod copy;
mod materiality;
mod normalize;
mod response;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::module::{factory, ModuleFactory};
use crate::registry::Registry;

pub use batch::{partition_units, PartitionBatches};
pub use copy::CopyVariable;
pub use materiality::{apply_rubrics, create_rubrics, Materiality, Rubrics};
pub use normalize::{min_max_normalize, MinMaxNormalize};
pub use response::SetResponse;

/// Function name every built-in module provides.
pub const EXECUTE: &str = "execute";

/// Registry holding the built-in modules under `modules.builtin`.
pub fn builtin_registry() -> Registry<ModuleFactory> {
    let mut registry: Registry<ModuleFactory> = Registry::new();
    registry
        .register(
            "modules.builtin.copy",
            "CopyVariable",
            factory(|_| Ok(CopyVariable)),
        )
        .register(
            "modules.builtin.normalize",
            "MinMaxNormalize",
            factory(|_| Ok(MinMaxNormalize)),
        )
        .register(
            "modules.builtin.response",
            "SetResponse",
            factory(|_| Ok(SetResponse)),
        )
        .register(
            "modules.builtin.batch",
            "PartitionBatches",
            factory(|_| Ok(PartitionBatches)),
        );
    registry
}

fn parse_params<T: DeserializeOwned>(module: &str, params: &Value) -> anyhow::Result<T> {
    serde_json::from_value(params.clone())
        .map_err(|e| anyhow::anyhow!("Invalid params for {module}: {e}"))
}
