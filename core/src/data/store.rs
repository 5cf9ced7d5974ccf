use crate::data::Dataset;
use crate::error::ToolError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Shared handle to the table the analysis capabilities read. The source file
/// is loaded on first use and cached for the rest of the process.
pub struct Datastore {
    source: Option<PathBuf>,
    dataset: OnceCell<Arc<Dataset>>,
}

impl Datastore {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(path.into()),
            dataset: OnceCell::new(),
        }
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        Self {
            source: None,
            dataset: OnceCell::new_with(Some(Arc::new(dataset))),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// An unreadable source is fatal: no later step can succeed without it.
    pub async fn dataset(&self) -> Result<Arc<Dataset>, ToolError> {
        self.dataset
            .get_or_try_init(|| async {
                let path = self
                    .source
                    .clone()
                    .ok_or_else(|| ToolError::fatal("datastore unreachable: no dataset configured"))?;

                let loaded = tokio::task::spawn_blocking(move || Dataset::load(&path))
                    .await
                    .map_err(|e| ToolError::fatal(format!("datastore unreachable: {e}")))?
                    .map_err(|e| ToolError::fatal(format!("datastore unreachable: {e:#}")))?;

                tracing::info!(
                    table = loaded.name(),
                    rows = loaded.row_count(),
                    columns = loaded.columns().len(),
                    "Loaded dataset"
                );
                Ok(Arc::new(loaded))
            })
            .await
            .cloned()
    }
}
