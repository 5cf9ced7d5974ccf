use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::fmt::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Integer,
    Number,
    Boolean,
    Text,
    /// Every value is null.
    Empty,
}

impl ColumnKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Number)
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Empty => "empty",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Json,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Csv,
        }
    }
}

/// An in-memory table. Cells are JSON scalars; a missing cell is `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Builds a table, inferring each column's kind from its values. Short
    /// rows are padded with `null`; extra cells are dropped.
    pub fn from_rows(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = headers.len();
        let rows: Vec<Vec<Value>> = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();

        let columns = headers
            .into_iter()
            .enumerate()
            .map(|(idx, name)| Column {
                kind: infer_kind(rows.iter().map(|row| &row[idx])),
                name,
            })
            .collect();

        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn parse(name: impl Into<String>, content: &str, format: SourceFormat) -> Result<Self> {
        match format {
            SourceFormat::Csv => Self::parse_csv(name, content),
            SourceFormat::Json => Self::parse_json(name, content),
        }
    }

    pub fn parse_csv(name: impl Into<String>, content: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read CSV header")?
            .iter()
            .map(str::to_string)
            .collect();
        if headers.is_empty() {
            bail!("CSV has no header row");
        }

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Failed to read row {}", idx + 1))?;
            rows.push(record.iter().map(parse_cell).collect());
        }

        Ok(Self::from_rows(name, headers, rows))
    }

    /// A JSON array of flat objects. Column order follows first appearance.
    pub fn parse_json(name: impl Into<String>, content: &str) -> Result<Self> {
        let records: Vec<Map<String, Value>> =
            serde_json::from_str(content).context("Expected a JSON array of objects")?;

        let mut headers: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                headers
                    .iter()
                    .map(|h| match record.get(h) {
                        Some(nested @ (Value::Array(_) | Value::Object(_))) => {
                            Value::String(nested.to_string())
                        }
                        Some(v) => v.clone(),
                        None => Value::Null,
                    })
                    .collect()
            })
            .collect();

        Ok(Self::from_rows(name, headers, rows))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset {}", path.display()))?;
        Self::parse(table_name(path), &content, SourceFormat::from_path(path))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[idx])
    }

    /// Finite numeric values of one column; non-numeric cells are skipped.
    pub fn numeric_values(&self, idx: usize) -> Vec<f64> {
        self.values(idx).filter_map(as_f64).collect()
    }

    pub fn numeric_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.kind.is_numeric()).collect()
    }

    /// Short schema description used as the dataset preamble of the prompt.
    pub fn schema_summary(&self) -> String {
        let mut out = format!(
            "Table `{}`: {} rows, {} columns\n",
            self.name,
            self.rows.len(),
            self.columns.len()
        );
        for column in &self.columns {
            let _ = writeln!(out, "- `{}` ({})", column.name, column.kind);
        }
        out
    }
}

pub fn table_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset")
        .to_string()
}

pub fn parse_cell(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") || raw.eq_ignore_ascii_case("na") {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>()
        && let Some(n) = Number::from_f64(f)
    {
        return Value::Number(n);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

pub fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64().filter(|f| f.is_finite())
}

/// Cell rendered for grouping and display; strings lose their quotes.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn infer_kind<'a>(values: impl Iterator<Item = &'a Value>) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;

    for value in values {
        let this = match value {
            Value::Null => continue,
            Value::Number(n) if n.is_i64() || n.is_u64() => ColumnKind::Integer,
            Value::Number(_) => ColumnKind::Number,
            Value::Bool(_) => ColumnKind::Boolean,
            _ => ColumnKind::Text,
        };

        kind = Some(match (kind, this) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Integer), ColumnKind::Number)
            | (Some(ColumnKind::Number), ColumnKind::Integer) => ColumnKind::Number,
            _ => ColumnKind::Text,
        });
    }

    kind.unwrap_or(ColumnKind::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const ORDERS: &str = "order_id,product,month,amount,paid\n\
                          1,Serum,October,120.5,true\n\
                          2,Lipstick,October,80,false\n\
                          3,Serum,September,,true\n";

    #[test]
    fn csv_kinds_are_inferred() {
        let dataset = Dataset::parse_csv("orders", ORDERS).unwrap();

        let kinds: Vec<_> = dataset.columns().iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ColumnKind::Integer,
                ColumnKind::Text,
                ColumnKind::Text,
                ColumnKind::Number,
                ColumnKind::Boolean
            ]
        );
        assert_eq!(dataset.row_count(), 3);
        assert_eq!(dataset.rows()[2][3], Value::Null);
        assert_eq!(dataset.numeric_values(3), vec![120.5, 80.0]);
    }

    #[test]
    fn json_records_pad_missing_keys() {
        let dataset = Dataset::parse_json(
            "orders",
            r#"[{"product": "Serum", "amount": 3}, {"product": "Toner", "region": "EU"}]"#,
        )
        .unwrap();

        let names: Vec<_> = dataset.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["amount", "product", "region"]);
        assert_eq!(dataset.rows()[0][2], Value::Null);
        assert_eq!(dataset.column("region").unwrap().kind, ColumnKind::Text);
    }

    #[test]
    fn load_picks_format_from_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sales.json");
        std::fs::write(&path, json!([{ "units": 1 }]).to_string()).unwrap();

        let dataset = Dataset::load(&path).unwrap();
        assert_eq!(dataset.name(), "sales");
        assert!(dataset.schema_summary().contains("`units` (integer)"));
    }

    #[test]
    fn cells_parse_as_scalars() {
        assert_eq!(parse_cell(" 42 "), json!(42));
        assert_eq!(parse_cell("4.5"), json!(4.5));
        assert_eq!(parse_cell("TRUE"), json!(true));
        assert_eq!(parse_cell("NA"), Value::Null);
        assert_eq!(parse_cell("Serum"), json!("Serum"));
    }
}
