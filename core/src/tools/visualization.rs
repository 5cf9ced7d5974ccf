use crate::data::{Dataset, Datastore, as_f64, display_value, stats};
use crate::error::ToolError;
use crate::tools::query::filtered_rows;
use crate::tools::{check_choice, extract_string_arg, extract_usize_arg_opt, resolve_column};
use crate::traits::{Arguments, Capability, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

const CHART_TYPES: &[&str] = &["bar", "line", "pie", "scatter", "histogram"];
const DEFAULT_BINS: usize = 10;
const PREVIEW_POINTS: usize = 5;

/// Renders chart descriptors (type, axes and points) as JSON files that a
/// front end can draw.
pub struct DataVisualizationTool {
    datastore: Arc<Datastore>,
    charts_dir: PathBuf,
}

impl DataVisualizationTool {
    pub fn new(datastore: Arc<Datastore>, charts_dir: impl Into<PathBuf>) -> Self {
        Self {
            datastore,
            charts_dir: charts_dir.into(),
        }
    }

    async fn write_chart(&self, chart: &Value) -> Result<PathBuf, ToolError> {
        tokio::fs::create_dir_all(&self.charts_dir)
            .await
            .map_err(|e| ToolError::fatal(format!("cannot create charts directory: {e}")))?;

        let path = self
            .charts_dir
            .join(format!("chart_{}.json", uuid::Uuid::new_v4().simple()));
        let body = serde_json::to_string_pretty(chart)
            .map_err(|e| ToolError::fatal(format!("cannot serialize chart: {e}")))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ToolError::fatal(format!("cannot write chart {}: {e}", path.display())))?;

        tracing::info!(path = %path.display(), "Chart written");
        Ok(path)
    }
}

/// Category totals of `y` per distinct `x`, or row counts when `y` is absent.
fn categorical_points(rows: &[&[Value]], x: usize, y: Option<usize>) -> Vec<Value> {
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, f64> = HashMap::new();

    for row in rows {
        let key = display_value(&row[x]);
        let amount = match y {
            Some(y) => match as_f64(&row[y]) {
                Some(v) => v,
                None => continue,
            },
            None => 1.0,
        };
        if !totals.contains_key(&key) {
            order.push(key.clone());
        }
        *totals.entry(key).or_insert(0.0) += amount;
    }

    order
        .into_iter()
        .map(|label| {
            let value = totals.get(&label).copied().unwrap_or_default();
            json!({ "label": label, "value": stats::round(value, 4) })
        })
        .collect()
}

fn scatter_points(rows: &[&[Value]], x: usize, y: usize) -> Vec<Value> {
    rows.iter()
        .filter_map(|row| {
            let (x, y) = (as_f64(&row[x])?, as_f64(&row[y])?);
            Some(json!({ "x": x, "y": y }))
        })
        .collect()
}

fn histogram_points(rows: &[&[Value]], x: usize, bins: usize) -> Vec<Value> {
    let values: Vec<f64> = rows.iter().filter_map(|row| as_f64(&row[x])).collect();
    let (Some(min), Some(max)) = (
        values.iter().copied().reduce(f64::min),
        values.iter().copied().reduce(f64::max),
    ) else {
        return Vec::new();
    };

    let bins = bins.max(1);
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };
    let mut counts = vec![0usize; bins];
    for v in &values {
        let idx = (((v - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| {
            let start = min + width * i as f64;
            json!({
                "start": stats::round(start, 4),
                "end": stats::round(start + width, 4),
                "count": count,
            })
        })
        .collect()
}

fn numeric_column(dataset: &Dataset, name: &str, role: &str) -> Result<usize, ToolError> {
    let idx = resolve_column(dataset, name)?;
    if !dataset.columns()[idx].kind.is_numeric() {
        return Err(ToolError::recoverable(format!(
            "{} column '{}' is not numeric",
            role, name
        )));
    }
    Ok(idx)
}

#[async_trait]
impl Capability for DataVisualizationTool {
    fn name(&self) -> &str {
        "data_visualization"
    }

    fn description(&self) -> &str {
        "Create a chart (bar, line, pie, scatter or histogram) from the dataset and \
         save it as a chart file. Returns the file path."
    }

    fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
        BTreeMap::from([
            (
                "chart_type".to_string(),
                ParameterSpec::required(
                    ParamType::String,
                    "bar | line | pie | scatter | histogram",
                ),
            ),
            (
                "x".to_string(),
                ParameterSpec::required(
                    ParamType::String,
                    "Category column, or the numeric column for scatter and histogram",
                ),
            ),
            (
                "y".to_string(),
                ParameterSpec::optional(
                    ParamType::String,
                    "Numeric column summed per category; required for scatter",
                ),
            ),
            (
                "title".to_string(),
                ParameterSpec::optional(ParamType::String, "Chart title"),
            ),
            (
                "filters".to_string(),
                ParameterSpec::optional(ParamType::Array, "Row filters, as in data_query"),
            ),
            (
                "bins".to_string(),
                ParameterSpec::optional(ParamType::Integer, "Histogram bin count (default 10)"),
            ),
        ])
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let chart_type = extract_string_arg(&args, "chart_type")?;
        check_choice("chart type", &chart_type, CHART_TYPES)?;

        let dataset = self.datastore.dataset().await?;
        let rows = filtered_rows(&dataset, &args)?;
        let x_name = extract_string_arg(&args, "x")?;
        let y_name = args.get("y").and_then(|v| v.as_str());

        let points = match chart_type.as_str() {
            "scatter" => {
                let y_name = y_name
                    .ok_or_else(|| ToolError::recoverable("scatter charts need a 'y' column"))?;
                let x = numeric_column(&dataset, &x_name, "x")?;
                let y = numeric_column(&dataset, y_name, "y")?;
                scatter_points(&rows, x, y)
            }
            "histogram" => {
                let x = numeric_column(&dataset, &x_name, "x")?;
                let bins = extract_usize_arg_opt(&args, "bins", DEFAULT_BINS);
                histogram_points(&rows, x, bins)
            }
            _ => {
                let x = resolve_column(&dataset, &x_name)?;
                let y = y_name
                    .map(|name| numeric_column(&dataset, name, "y"))
                    .transpose()?;
                categorical_points(&rows, x, y)
            }
        };

        if points.is_empty() {
            return Err(ToolError::recoverable(
                "no data points left to plot; relax the filters or pick other columns",
            ));
        }

        let title = args
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| match y_name {
                Some(y) => format!("{} by {}", y, x_name),
                None => format!("{} of {}", chart_type, x_name),
            });

        let chart = json!({
            "chart_type": chart_type,
            "title": title,
            "x": x_name,
            "y": y_name,
            "points": points,
        });
        let path = self.write_chart(&chart).await?;

        let preview: Vec<&Value> = points.iter().take(PREVIEW_POINTS).collect();
        Ok(json!({
            "path": path.display().to_string(),
            "chart_type": chart_type,
            "title": title,
            "point_count": points.len(),
            "preview": preview,
        }))
    }
}
