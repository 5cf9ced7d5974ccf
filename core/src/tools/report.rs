use crate::error::ToolError;
use crate::tools::{check_choice, extract_string_arg, extract_string_arg_opt};
use crate::traits::{Arguments, Capability, ParamType, ParameterSpec};
use async_trait::async_trait;
use chrono::Local;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;

const REPORT_TYPES: &[&str] = &["summary", "detailed", "executive"];

/// Assembles findings from earlier steps into a Markdown report on disk.
pub struct ReportGeneratorTool {
    reports_dir: PathBuf,
}

impl ReportGeneratorTool {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }
}

fn heading(report_type: &str) -> &'static str {
    match report_type {
        "detailed" => "Detailed Analysis Report",
        "executive" => "Executive Briefing",
        _ => "Analysis Summary",
    }
}

/// Non-empty lines of the findings, with list markers stripped.
fn findings(results: &str) -> Vec<&str> {
    results
        .lines()
        .map(|l| l.trim().trim_start_matches(['-', '*', '•']).trim())
        .filter(|l| !l.is_empty())
        .collect()
}

pub fn render_report(question: &str, results: &str, report_type: &str, generated: &str) -> String {
    let items = findings(results);
    let mut out = format!("# {}\n\n_Generated {}_\n\n", heading(report_type), generated);

    if !question.is_empty() {
        let _ = writeln!(out, "## Question\n\n{}\n", question);
    }

    match report_type {
        "executive" => {
            out.push_str("## Key Takeaways\n\n");
            for item in items.iter().take(3) {
                let _ = writeln!(out, "- **{}**", item);
            }
            out.push_str("\n## Recommended Actions\n\n");
            out.push_str("- Review the takeaways above with the owning team.\n");
            out.push_str("- Track the leading metric in the next reporting period.\n");
        }
        "detailed" => {
            out.push_str("## Findings\n\n");
            for (i, item) in items.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", i + 1, item);
            }
            let _ = writeln!(out, "\n## Analysis Log\n\n```\n{}\n```", results.trim());
            out.push_str("\n## Limitations\n\n");
            out.push_str("- Figures reflect the loaded dataset only.\n");
        }
        _ => {
            out.push_str("## Key Findings\n\n");
            for item in &items {
                let _ = writeln!(out, "- {}", item);
            }
        }
    }

    out
}

#[async_trait]
impl Capability for ReportGeneratorTool {
    fn name(&self) -> &str {
        "report_generator"
    }

    fn description(&self) -> &str {
        "Write a Markdown report from findings gathered in earlier steps. \
         Call this last, passing the findings as analysis_results."
    }

    fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
        BTreeMap::from([
            (
                "question".to_string(),
                ParameterSpec::optional(ParamType::String, "The original analysis request"),
            ),
            (
                "analysis_results".to_string(),
                ParameterSpec::required(
                    ParamType::String,
                    "Findings from earlier steps, one per line",
                ),
            ),
            (
                "report_type".to_string(),
                ParameterSpec::optional(
                    ParamType::String,
                    "summary | detailed | executive (default summary)",
                ),
            ),
        ])
    }

    async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
        let results = extract_string_arg(&args, "analysis_results")?;
        if results.trim().is_empty() {
            return Err(ToolError::recoverable(
                "no analysis results to report; run an analysis first",
            ));
        }
        let question = extract_string_arg_opt(&args, "question", "");
        let report_type = extract_string_arg_opt(&args, "report_type", "summary");
        check_choice("report_type", &report_type, REPORT_TYPES)?;

        let now = Local::now();
        let body = render_report(
            &question,
            &results,
            &report_type,
            &now.format("%Y-%m-%d %H:%M").to_string(),
        );

        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .map_err(|e| ToolError::fatal(format!("cannot create reports directory: {e}")))?;
        let path = self.reports_dir.join(format!(
            "report_{}_{}.md",
            report_type,
            now.format("%Y%m%d_%H%M%S_%3f")
        ));
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| ToolError::fatal(format!("cannot write report {}: {e}", path.display())))?;

        tracing::info!(path = %path.display(), report_type = %report_type, "Report saved");
        Ok(json!({
            "path": path.display().to_string(),
            "report_type": report_type,
            "body": body,
        }))
    }
}
