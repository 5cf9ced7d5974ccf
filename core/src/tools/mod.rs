use crate::agent::CapabilityRegistry;
use crate::data::{Dataset, Datastore};
use crate::error::{RegistryError, ToolError};
use crate::traits::Arguments;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub mod inspector;
pub mod profiling;
pub mod query;
pub mod report;
pub mod statistics;
pub mod visualization;

pub use inspector::DataInspectorTool;
pub use profiling::DataProfilingTool;
pub use query::DataQueryTool;
pub use report::ReportGeneratorTool;
pub use statistics::StatisticalAnalysisTool;
pub use visualization::DataVisualizationTool;

/// Registers the six analysis capabilities in their manifest order.
pub fn register_default_capabilities(
    registry: &mut CapabilityRegistry,
    datastore: Arc<Datastore>,
    workspace: impl AsRef<Path>,
) -> Result<(), RegistryError> {
    let workspace = workspace.as_ref();

    registry.register(DataInspectorTool::new(datastore.clone()))?;
    registry.register(DataQueryTool::new(datastore.clone()))?;
    registry.register(StatisticalAnalysisTool::new(datastore.clone()))?;
    registry.register(DataProfilingTool::new(datastore.clone()))?;
    registry.register(DataVisualizationTool::new(
        datastore,
        workspace.join("charts"),
    ))?;
    registry.register(ReportGeneratorTool::new(workspace.join("reports")))?;
    Ok(())
}

pub fn extract_string_arg(args: &Arguments, key: &str) -> Result<String, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ToolError::recoverable(format!("Missing '{}' parameter", key)))
}

pub fn extract_string_arg_opt(args: &Arguments, key: &str, default: &str) -> String {
    args.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

pub fn extract_usize_arg_opt(args: &Arguments, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub fn extract_bool_arg_opt(args: &Arguments, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// String list argument; a bare string is accepted as a one-element list.
pub fn extract_string_list(args: &Arguments, key: &str) -> Result<Vec<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ToolError::recoverable(format!("'{}' must be a list of column names", key))
                })
            })
            .collect(),
        Some(_) => Err(ToolError::recoverable(format!(
            "'{}' must be a list of column names",
            key
        ))),
    }
}

/// Index of `name` in the dataset, or a recoverable error listing the
/// available columns so the next round can correct itself.
pub fn resolve_column(dataset: &Dataset, name: &str) -> Result<usize, ToolError> {
    dataset.column_index(name).ok_or_else(|| {
        let available: Vec<&str> = dataset.columns().iter().map(|c| c.name.as_str()).collect();
        ToolError::recoverable(format!(
            "unknown column '{}'; available: {}",
            name,
            available.join(", ")
        ))
    })
}

/// Rejects a value outside `allowed` with the list of valid choices.
pub fn check_choice(key: &str, value: &str, allowed: &[&str]) -> Result<(), ToolError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ToolError::recoverable(format!(
            "unsupported {} '{}'; supported: {}",
            key,
            value,
            allowed.join(", ")
        )))
    }
}
