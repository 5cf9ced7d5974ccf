use crate::data::{Dataset, Datastore, display_value};
use crate::error::ToolError;
use crate::tools::{check_choice, extract_string_arg_opt, extract_usize_arg_opt, resolve_column};
use crate::traits::{Arguments, Capability, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const INSPECT_TYPES: &[&str] = &["overview", "schema", "sample", "column_detail"];
const DISTINCT_PREVIEW: usize = 10;

pub struct DataInspectorTool {
    datastore: Arc<Datastore>,
}

impl DataInspectorTool {
    pub fn new(datastore: Arc<Datastore>) -> Self {
        Self { datastore }
    }
}

#[async_trait]
impl Capability for DataInspectorTool {
    fn name(&self) -> &str {
        "data_inspector"
    }

    fn description(&self) -> &str {
        "Inspect the dataset: overview, column schema, sample rows or per-column detail. \
         Use this first to learn which columns exist."
    }

    fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
        BTreeMap::from([
            (
                "inspect_type".to_string(),
                ParameterSpec::optional(
                    ParamType::String,
                    "overview | schema | sample | column_detail (default overview)",
                ),
            ),
            (
                "column_name".to_string(),
                ParameterSpec::optional(ParamType::String, "Column for column_detail"),
            ),
            (
                "limit".to_string(),
                ParameterSpec::optional(ParamType::Integer, "Rows returned by sample (default 5)"),
            ),
        ])
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let inspect_type = extract_string_arg_opt(&args, "inspect_type", "overview");
        check_choice("inspect_type", &inspect_type, INSPECT_TYPES)?;

        let dataset = self.datastore.dataset().await?;

        match inspect_type.as_str() {
            "schema" => Ok(schema(&dataset)),
            "sample" => Ok(sample(&dataset, extract_usize_arg_opt(&args, "limit", 5))),
            "column_detail" => {
                let column = args.get("column_name").and_then(|v| v.as_str());
                column_detail(&dataset, column)
            }
            _ => Ok(overview(&dataset)),
        }
    }
}

fn schema(dataset: &Dataset) -> Value {
    let columns: Vec<Value> = dataset
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let nulls = dataset.values(idx).filter(|v| v.is_null()).count();
            json!({
                "name": column.name,
                "type": column.kind,
                "nullable": nulls > 0,
            })
        })
        .collect();

    json!({ "table": dataset.name(), "columns": columns })
}

pub(crate) fn row_object(dataset: &Dataset, row: &[Value]) -> Value {
    let map: Map<String, Value> = dataset
        .columns()
        .iter()
        .zip(row)
        .map(|(column, value)| (column.name.clone(), value.clone()))
        .collect();
    Value::Object(map)
}

fn sample(dataset: &Dataset, limit: usize) -> Value {
    let rows: Vec<Value> = dataset
        .rows()
        .iter()
        .take(limit.max(1))
        .map(|row| row_object(dataset, row))
        .collect();

    json!({ "table": dataset.name(), "rows": rows })
}

fn column_detail(dataset: &Dataset, column: Option<&str>) -> Result<Value, ToolError> {
    let indices: Vec<usize> = match column {
        Some(name) => vec![resolve_column(dataset, name)?],
        None => (0..dataset.columns().len()).collect(),
    };

    let details: Vec<Value> = indices
        .into_iter()
        .map(|idx| {
            let column = &dataset.columns()[idx];
            let distinct: BTreeSet<String> = dataset
                .values(idx)
                .filter(|v| !v.is_null())
                .map(display_value)
                .collect();
            let examples: Vec<&String> = distinct.iter().take(DISTINCT_PREVIEW).collect();
            json!({
                "name": column.name,
                "type": column.kind,
                "distinct_count": distinct.len(),
                "examples": examples,
            })
        })
        .collect();

    Ok(json!({ "table": dataset.name(), "columns": details }))
}

fn overview(dataset: &Dataset) -> Value {
    let numeric: Vec<&str> = dataset
        .numeric_columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    let columns: Vec<Value> = dataset
        .columns()
        .iter()
        .map(|c| json!({ "name": c.name, "type": c.kind }))
        .collect();

    json!({
        "table": dataset.name(),
        "row_count": dataset.row_count(),
        "column_count": dataset.columns().len(),
        "numeric_columns": numeric,
        "columns": columns,
        "sample": sample(dataset, 3)["rows"],
    })
}
