use crate::data::{Dataset, Datastore, as_f64, display_value, stats};
use crate::error::ToolError;
use crate::tools::{
    check_choice, extract_bool_arg_opt, extract_string_list, extract_usize_arg_opt,
    resolve_column,
};
use crate::traits::{Arguments, Capability, ParamType, ParameterSpec};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 500;

const AGGREGATES: &[&str] = &["sum", "count", "avg", "min", "max"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl FilterOp {
    const NAMES: &'static [&'static str] = &["eq", "ne", "gt", "gte", "lt", "lte", "contains"];

    fn parse(op: &str) -> Result<Self, ToolError> {
        Ok(match op {
            "eq" | "=" | "==" => Self::Eq,
            "ne" | "!=" => Self::Ne,
            "gt" | ">" => Self::Gt,
            "gte" | ">=" => Self::Gte,
            "lt" | "<" => Self::Lt,
            "lte" | "<=" => Self::Lte,
            "contains" => Self::Contains,
            other => {
                return Err(ToolError::recoverable(format!(
                    "unsupported filter op '{}'; supported: {}",
                    other,
                    Self::NAMES.join(", ")
                )));
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    column: usize,
    op: FilterOp,
    value: Value,
}

impl Filter {
    fn matches(&self, row: &[Value]) -> bool {
        let cell = &row[self.column];
        match self.op {
            FilterOp::Eq => compare(cell, &self.value) == Some(Ordering::Equal),
            FilterOp::Ne => compare(cell, &self.value) != Some(Ordering::Equal),
            FilterOp::Gt => compare(cell, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare(cell, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare(cell, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare(cell, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Contains => {
                !cell.is_null()
                    && display_value(cell)
                        .to_lowercase()
                        .contains(&display_value(&self.value).to_lowercase())
            }
        }
    }
}

/// Numbers compare numerically, everything else by its display text.
/// `None` when either side is null.
fn compare(cell: &Value, target: &Value) -> Option<Ordering> {
    if cell.is_null() || target.is_null() {
        return None;
    }
    let target_num = as_f64(target).or_else(|| target.as_str().and_then(|s| s.parse().ok()));
    match (as_f64(cell), target_num) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(display_value(cell).cmp(&display_value(target))),
    }
}

/// Sort order for result rows: numbers numerically, nulls last.
pub(crate) fn sort_key_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => display_value(a).cmp(&display_value(b)),
        },
    }
}

/// Parses the `filters` argument: an array of `{column, op, value}`.
pub fn parse_filters(dataset: &Dataset, args: &Arguments) -> Result<Vec<Filter>, ToolError> {
    let Some(raw) = args.get("filters").filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let items = raw
        .as_array()
        .ok_or_else(|| ToolError::recoverable("'filters' must be an array of {column, op, value}"))?;

    items
        .iter()
        .map(|item| {
            let column = item
                .get("column")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::recoverable("each filter needs a 'column'"))?;
            let op = item.get("op").and_then(|v| v.as_str()).unwrap_or("eq");
            Ok(Filter {
                column: resolve_column(dataset, column)?,
                op: FilterOp::parse(op)?,
                value: item.get("value").cloned().unwrap_or(Value::Null),
            })
        })
        .collect()
}

pub fn filtered_rows<'a>(
    dataset: &'a Dataset,
    args: &Arguments,
) -> Result<Vec<&'a [Value]>, ToolError> {
    let filters = parse_filters(dataset, args)?;
    Ok(dataset
        .rows()
        .iter()
        .map(Vec::as_slice)
        .filter(|row| filters.iter().all(|f| f.matches(row)))
        .collect())
}

fn aggregate(name: &str, values: &[f64], count: usize) -> Value {
    let result = match name {
        "count" => return json!(count),
        "sum" => Some(stats::sum(values)),
        "avg" => stats::mean(values),
        "min" => values.iter().copied().reduce(f64::min),
        "max" => values.iter().copied().reduce(f64::max),
        _ => None,
    };
    result.map(|v| json!(stats::round(v, 4))).unwrap_or(Value::Null)
}

struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

pub struct DataQueryTool {
    datastore: Arc<Datastore>,
}

impl DataQueryTool {
    pub fn new(datastore: Arc<Datastore>) -> Self {
        Self { datastore }
    }

    fn run(&self, dataset: &Dataset, args: &Arguments) -> Result<Value, ToolError> {
        let rows = filtered_rows(dataset, args)?;

        let group_by = args.get("group_by").and_then(|v| v.as_str());
        let aggregate_name = args.get("aggregate").and_then(|v| v.as_str());
        let value_column = args.get("value_column").and_then(|v| v.as_str());

        let mut table = if group_by.is_some() || aggregate_name.is_some() {
            let aggregate_name = aggregate_name.unwrap_or(if value_column.is_some() {
                "sum"
            } else {
                "count"
            });
            check_choice("aggregate", aggregate_name, AGGREGATES)?;
            grouped(dataset, &rows, group_by, aggregate_name, value_column)?
        } else {
            projected(dataset, &rows, &extract_string_list(args, "columns")?)?
        };

        if let Some(sort_by) = args.get("sort_by").and_then(|v| v.as_str()) {
            let idx = table
                .columns
                .iter()
                .position(|c| c == sort_by)
                .ok_or_else(|| {
                    ToolError::recoverable(format!(
                        "cannot sort by '{}'; result columns: {}",
                        sort_by,
                        table.columns.join(", ")
                    ))
                })?;
            let descending = extract_bool_arg_opt(args, "descending", false);
            table.rows.sort_by(|a, b| {
                let ord = sort_key_cmp(&a[idx], &b[idx]);
                if descending { ord.reverse() } else { ord }
            });
        }

        let limit = extract_usize_arg_opt(args, "limit", DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let row_count = table.rows.len();
        table.rows.truncate(limit);

        Ok(json!({
            "table": dataset.name(),
            "columns": table.columns,
            "rows": table.rows,
            "row_count": row_count,
            "truncated": row_count > limit,
        }))
    }
}

fn projected(dataset: &Dataset, rows: &[&[Value]], columns: &[String]) -> Result<Table, ToolError> {
    let indices: Vec<usize> = if columns.is_empty() {
        (0..dataset.columns().len()).collect()
    } else {
        columns
            .iter()
            .map(|c| resolve_column(dataset, c))
            .collect::<Result<_, _>>()?
    };

    Ok(Table {
        columns: indices
            .iter()
            .map(|&i| dataset.columns()[i].name.clone())
            .collect(),
        rows: rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect(),
    })
}

fn grouped(
    dataset: &Dataset,
    rows: &[&[Value]],
    group_by: Option<&str>,
    aggregate_name: &str,
    value_column: Option<&str>,
) -> Result<Table, ToolError> {
    let group_idx = group_by.map(|g| resolve_column(dataset, g)).transpose()?;
    let value_idx = match value_column {
        Some(v) => Some(resolve_column(dataset, v)?),
        None if aggregate_name == "count" => None,
        None => {
            return Err(ToolError::recoverable(format!(
                "aggregate '{}' needs a 'value_column'",
                aggregate_name
            )));
        }
    };

    // Groups keep first-appearance order until sorted.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Value, Vec<f64>, usize)> = HashMap::new();
    for row in rows {
        let key_value = group_idx.map(|i| row[i].clone()).unwrap_or(Value::Null);
        let key = display_value(&key_value);
        let entry = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            (key_value, Vec::new(), 0)
        });
        entry.2 += 1;
        if let Some(v) = value_idx.and_then(|i| as_f64(&row[i])) {
            entry.1.push(v);
        }
    }

    let metric = match value_column {
        Some(v) => format!("{}_{}", aggregate_name, v),
        None => "count".to_string(),
    };

    let mut columns = Vec::new();
    if let Some(g) = group_by {
        columns.push(g.to_string());
    }
    columns.push(metric);

    let rows = if group_idx.is_none() {
        let values: Vec<f64> = value_idx
            .map(|i| rows.iter().filter_map(|r| as_f64(&r[i])).collect())
            .unwrap_or_default();
        vec![vec![aggregate(aggregate_name, &values, rows.len())]]
    } else {
        order
            .iter()
            .filter_map(|key| groups.get(key))
            .map(|(key_value, values, count)| {
                vec![key_value.clone(), aggregate(aggregate_name, values, *count)]
            })
            .collect()
    };

    Ok(Table { columns, rows })
}

#[async_trait]
impl Capability for DataQueryTool {
    fn name(&self) -> &str {
        "data_query"
    }

    fn description(&self) -> &str {
        "Filter, group, aggregate and sort rows of the dataset. Returns a small table."
    }

    fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
        BTreeMap::from([
            (
                "filters".to_string(),
                ParameterSpec::optional(
                    ParamType::Array,
                    "List of {column, op, value}; op is eq, ne, gt, gte, lt, lte or contains",
                ),
            ),
            (
                "group_by".to_string(),
                ParameterSpec::optional(ParamType::String, "Column to group rows by"),
            ),
            (
                "aggregate".to_string(),
                ParameterSpec::optional(ParamType::String, "sum | count | avg | min | max"),
            ),
            (
                "value_column".to_string(),
                ParameterSpec::optional(ParamType::String, "Numeric column to aggregate"),
            ),
            (
                "columns".to_string(),
                ParameterSpec::optional(
                    ParamType::Array,
                    "Columns to return when not aggregating (default all)",
                ),
            ),
            (
                "sort_by".to_string(),
                ParameterSpec::optional(ParamType::String, "Result column to sort on"),
            ),
            (
                "descending".to_string(),
                ParameterSpec::optional(ParamType::Boolean, "Sort descending"),
            ),
            (
                "limit".to_string(),
                ParameterSpec::optional(ParamType::Integer, "Maximum rows returned (default 50)"),
            ),
        ])
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let dataset = self.datastore.dataset().await?;
        self.run(&dataset, &args)
    }
}
