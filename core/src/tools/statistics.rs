use crate::data::{Dataset, Datastore, stats};
use crate::error::ToolError;
use crate::tools::inspector::row_object;
use crate::tools::query::sort_key_cmp;
use crate::tools::{
    check_choice, extract_bool_arg_opt, extract_string_arg_opt, extract_string_list,
    extract_usize_arg_opt, resolve_column,
};
use crate::traits::{Arguments, Capability, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

const ANALYSIS_TYPES: &[&str] = &["descriptive", "correlation", "top_n"];
const STRONG_CORRELATION: f64 = 0.7;
const SKEW_THRESHOLD: f64 = 0.5;

pub struct StatisticalAnalysisTool {
    datastore: Arc<Datastore>,
}

impl StatisticalAnalysisTool {
    pub fn new(datastore: Arc<Datastore>) -> Self {
        Self { datastore }
    }
}

/// Requested columns, or every numeric column when none are named. Named
/// columns must be numeric.
fn numeric_targets(dataset: &Dataset, names: &[String]) -> Result<Vec<usize>, ToolError> {
    if names.is_empty() {
        return Ok(dataset
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind.is_numeric())
            .map(|(i, _)| i)
            .collect());
    }

    names
        .iter()
        .map(|name| {
            let idx = resolve_column(dataset, name)?;
            if dataset.columns()[idx].kind.is_numeric() {
                Ok(idx)
            } else {
                Err(ToolError::recoverable(format!("column '{}' is not numeric", name)))
            }
        })
        .collect()
}

fn skew_label(skew: f64) -> &'static str {
    if skew > SKEW_THRESHOLD {
        "right-skewed"
    } else if skew < -SKEW_THRESHOLD {
        "left-skewed"
    } else {
        "roughly symmetric"
    }
}

fn descriptive(dataset: &Dataset, columns: &[usize]) -> Result<Value, ToolError> {
    if columns.is_empty() {
        return Err(ToolError::recoverable("the dataset has no numeric columns"));
    }

    let summaries: Vec<Value> = columns
        .iter()
        .map(|&idx| {
            let values = dataset.numeric_values(idx);
            let sorted = stats::sorted(&values);
            let r = |v: Option<f64>| v.map(|v| stats::round(v, 4));
            let skew = stats::skewness(&values);
            json!({
                "column": dataset.columns()[idx].name,
                "count": values.len(),
                "mean": r(stats::mean(&values)),
                "std": r(stats::std_dev(&values)),
                "min": r(sorted.first().copied()),
                "p25": r(stats::quantile(&sorted, 0.25)),
                "median": r(stats::quantile(&sorted, 0.5)),
                "p75": r(stats::quantile(&sorted, 0.75)),
                "max": r(sorted.last().copied()),
                "skewness": r(skew),
                "shape": skew.map(skew_label),
            })
        })
        .collect();

    Ok(json!({ "analysis_type": "descriptive", "columns": summaries }))
}

fn correlation(dataset: &Dataset, columns: &[usize]) -> Result<Value, ToolError> {
    if columns.len() < 2 {
        return Err(ToolError::recoverable(
            "correlation needs at least two numeric columns",
        ));
    }

    let mut pairs = Vec::new();
    let mut strong = Vec::new();
    for (i, &a) in columns.iter().enumerate() {
        for &b in &columns[i + 1..] {
            // Only rows where both sides are numeric.
            let (xs, ys): (Vec<f64>, Vec<f64>) = dataset
                .rows()
                .iter()
                .filter_map(|row| Some((row[a].as_f64()?, row[b].as_f64()?)))
                .unzip();
            let r = stats::pearson(&xs, &ys).map(|r| stats::round(r, 3));
            let names = (&dataset.columns()[a].name, &dataset.columns()[b].name);

            if let Some(r) = r
                && r.abs() > STRONG_CORRELATION
            {
                strong.push(json!({ "a": names.0, "b": names.1, "r": r }));
            }
            pairs.push(json!({ "a": names.0, "b": names.1, "r": r, "n": xs.len() }));
        }
    }

    Ok(json!({ "analysis_type": "correlation", "pairs": pairs, "strong": strong }))
}

fn top_n(dataset: &Dataset, args: &Arguments, columns: &[usize]) -> Result<Value, ToolError> {
    let by = match args.get("by").and_then(|v| v.as_str()) {
        Some(name) => resolve_column(dataset, name)?,
        None => *columns.first().ok_or_else(|| {
            ToolError::recoverable("top_n needs a 'by' column or a numeric column to rank on")
        })?,
    };
    let n = extract_usize_arg_opt(args, "n", 10).max(1);
    let ascending = extract_bool_arg_opt(args, "ascending", false);

    let mut rows: Vec<&Vec<Value>> = dataset.rows().iter().filter(|r| !r[by].is_null()).collect();
    rows.sort_by(|a, b| {
        let ord = sort_key_cmp(&a[by], &b[by]);
        if ascending { ord } else { ord.reverse() }
    });

    let top: Vec<Value> = rows
        .into_iter()
        .take(n)
        .map(|row| row_object(dataset, row))
        .collect();

    Ok(json!({
        "analysis_type": "top_n",
        "by": dataset.columns()[by].name,
        "rows": top,
    }))
}

#[async_trait]
impl Capability for StatisticalAnalysisTool {
    fn name(&self) -> &str {
        "statistical_analysis"
    }

    fn description(&self) -> &str {
        "Descriptive statistics, pairwise correlation or top-N ranking over numeric columns."
    }

    fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
        BTreeMap::from([
            (
                "analysis_type".to_string(),
                ParameterSpec::optional(
                    ParamType::String,
                    "descriptive | correlation | top_n (default descriptive)",
                ),
            ),
            (
                "columns".to_string(),
                ParameterSpec::optional(
                    ParamType::Array,
                    "Numeric columns to analyse (default all numeric)",
                ),
            ),
            (
                "by".to_string(),
                ParameterSpec::optional(ParamType::String, "Ranking column for top_n"),
            ),
            (
                "n".to_string(),
                ParameterSpec::optional(ParamType::Integer, "Rows returned by top_n (default 10)"),
            ),
            (
                "ascending".to_string(),
                ParameterSpec::optional(ParamType::Boolean, "Rank smallest first for top_n"),
            ),
        ])
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let analysis_type = extract_string_arg_opt(&args, "analysis_type", "descriptive");
        check_choice("analysis_type", &analysis_type, ANALYSIS_TYPES)?;

        let dataset = self.datastore.dataset().await?;
        let columns = numeric_targets(&dataset, &extract_string_list(&args, "columns")?)?;

        match analysis_type.as_str() {
            "correlation" => correlation(&dataset, &columns),
            "top_n" => top_n(&dataset, &args, &columns),
            _ => descriptive(&dataset, &columns),
        }
    }
}
