use crate::data::{Dataset, Datastore, display_value, stats};
use crate::error::ToolError;
use crate::tools::{check_choice, extract_string_arg_opt};
use crate::traits::{Arguments, Capability, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const PROFILE_TYPES: &[&str] = &["full", "missing", "unique", "outliers"];
const TOP_VALUES: usize = 5;
const MAX_CATEGORICAL: usize = 10;

pub struct DataProfilingTool {
    datastore: Arc<Datastore>,
}

impl DataProfilingTool {
    pub fn new(datastore: Arc<Datastore>) -> Self {
        Self { datastore }
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        stats::round(part as f64 / whole as f64 * 100.0, 2)
    }
}

fn missing_advice(pct: f64) -> &'static str {
    if pct > 50.0 {
        "consider dropping the column"
    } else if pct > 20.0 {
        "needs imputation"
    } else if pct > 0.0 {
        "minor gaps, can be filled"
    } else {
        "complete"
    }
}

fn missing(dataset: &Dataset) -> Value {
    let rows = dataset.row_count();
    let mut total = 0;

    let columns: Vec<Value> = dataset
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let nulls = dataset.values(idx).filter(|v| v.is_null()).count();
            total += nulls;
            let pct = percent(nulls, rows);
            json!({
                "column": column.name,
                "missing": nulls,
                "missing_pct": pct,
                "advice": missing_advice(pct),
            })
        })
        .collect();

    json!({
        "profile_type": "missing",
        "columns": columns,
        "total_missing": total,
        "total_missing_pct": percent(total, rows * dataset.columns().len()),
    })
}

/// Distinct non-null values with their counts, most frequent first.
fn frequencies(dataset: &Dataset, idx: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for value in dataset.values(idx).filter(|v| !v.is_null()) {
        *counts.entry(display_value(value)).or_default() += 1;
    }
    let mut counts: Vec<(String, usize)> = counts.into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

fn unique(dataset: &Dataset) -> Value {
    let rows = dataset.row_count();
    let columns: Vec<Value> = dataset
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let distinct = frequencies(dataset, idx).len();
            json!({
                "column": column.name,
                "type": column.kind,
                "distinct": distinct,
                "distinct_pct": percent(distinct, rows),
            })
        })
        .collect();

    json!({ "profile_type": "unique", "columns": columns })
}

/// IQR fences per numeric column; only columns with outliers are listed.
fn outliers(dataset: &Dataset) -> Value {
    let mut columns = Vec::new();

    for (idx, column) in dataset.columns().iter().enumerate() {
        if !column.kind.is_numeric() {
            continue;
        }
        let sorted = stats::sorted(&dataset.numeric_values(idx));
        let (Some(q1), Some(q3)) = (stats::quantile(&sorted, 0.25), stats::quantile(&sorted, 0.75))
        else {
            continue;
        };
        let iqr = q3 - q1;
        let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
        let found: Vec<f64> = sorted
            .iter()
            .copied()
            .filter(|v| *v < lower || *v > upper)
            .collect();

        if let (Some(lo), Some(hi)) = (found.first(), found.last()) {
            columns.push(json!({
                "column": column.name,
                "lower_fence": stats::round(lower, 4),
                "upper_fence": stats::round(upper, 4),
                "outliers": found.len(),
                "outlier_pct": percent(found.len(), sorted.len()),
                "outlier_range": [lo, hi],
            }));
        }
    }

    json!({
        "profile_type": "outliers",
        "method": "iqr",
        "none_found": columns.is_empty(),
        "columns": columns,
    })
}

fn full(dataset: &Dataset) -> Value {
    let numeric: Vec<Value> = dataset
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind.is_numeric())
        .map(|(idx, column)| {
            let values = dataset.numeric_values(idx);
            let r = |v: Option<f64>| v.map(|v| stats::round(v, 2));
            json!({
                "column": column.name,
                "count": values.len(),
                "mean": r(stats::mean(&values)),
                "std": r(stats::std_dev(&values)),
                "median": r(stats::median(&values)),
            })
        })
        .collect();

    let categorical: Vec<Value> = dataset
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.kind.is_numeric())
        .take(MAX_CATEGORICAL)
        .map(|(idx, column)| {
            let freq = frequencies(dataset, idx);
            let top: Vec<Value> = freq
                .iter()
                .take(TOP_VALUES)
                .map(|(value, count)| {
                    json!({
                        "value": value,
                        "count": count,
                        "pct": percent(*count, dataset.row_count()),
                    })
                })
                .collect();
            json!({ "column": column.name, "distinct": freq.len(), "top": top })
        })
        .collect();

    let missing_profile = missing(dataset);
    let incomplete: Vec<&Value> = missing_profile["columns"]
        .as_array()
        .map(|cols| cols.iter().filter(|c| c["missing"] != 0).collect())
        .unwrap_or_default();

    json!({
        "profile_type": "full",
        "rows": dataset.row_count(),
        "columns": dataset.columns().len(),
        "missing": incomplete,
        "numeric": numeric,
        "categorical": categorical,
    })
}

#[async_trait]
impl Capability for DataProfilingTool {
    fn name(&self) -> &str {
        "data_profiling"
    }

    fn description(&self) -> &str {
        "Data quality profile: missing values, distinct counts, IQR outliers, or a full overview."
    }

    fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
        BTreeMap::from([(
            "profile_type".to_string(),
            ParameterSpec::optional(
                ParamType::String,
                "full | missing | unique | outliers (default full)",
            ),
        )])
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let profile_type = extract_string_arg_opt(&args, "profile_type", "full");
        check_choice("profile_type", &profile_type, PROFILE_TYPES)?;

        let dataset = self.datastore.dataset().await?;
        Ok(match profile_type.as_str() {
            "missing" => missing(&dataset),
            "unique" => unique(&dataset),
            "outliers" => outliers(&dataset),
            _ => full(&dataset),
        })
    }
}
