//! Archival object store.
//!
//! Layout: `{root}/{prefix}/{table_name}/{granularity_label}/{run_stamp}.csv`
//!
//! One blob per series and run. Writes are atomic (write to .tmp, rename
//! into place), so rerunning with the same run stamp overwrites the same
//! blob.

use async_trait::async_trait;
use market_core::{CollectorError, CollectorResult, PricePoint, Series};
use std::path::PathBuf;

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Blob sink addressed by slash-separated object paths
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn put(&self, path: &str, content_type: &str, body: Vec<u8>) -> CollectorResult<()>;
}

/// Object path of a series' blob for one run
pub fn archive_path(prefix: &str, series: &Series, run_stamp: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let key = format!(
        "{}/{}/{}.csv",
        series.table_name, series.granularity_label, run_stamp
    );
    if prefix.is_empty() {
        key
    } else {
        format!("{}/{}", prefix, key)
    }
}

/// Serialize a batch as CSV with a header row
pub fn encode_csv(points: &[PricePoint]) -> Result<Vec<u8>, String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for point in points {
        writer.serialize(point).map_err(|e| e.to_string())?;
    }
    writer.into_inner().map_err(|e| e.to_string())
}

/// Archive store rooted at a local directory
pub struct FsArchiveStore {
    root: PathBuf,
}

impl FsArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an object path below the root, refusing `..` and absolute segments
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let mut full = self.root.clone();
        for segment in path.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return None;
            }
            full.push(segment);
        }
        Some(full)
    }
}

#[async_trait]
impl ArchiveStore for FsArchiveStore {
    async fn put(&self, path: &str, content_type: &str, body: Vec<u8>) -> CollectorResult<()> {
        let fail = |message: String| CollectorError::Write {
            table: path.to_string(),
            sink: "archive".to_string(),
            message,
        };

        let full = self
            .resolve(path)
            .ok_or_else(|| fail(format!("invalid object path: {}", path)))?;

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(format!("failed to create dir: {}", e)))?;
        }

        let mut tmp_name = full.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| fail(format!("failed to write blob: {}", e)))?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &full).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(fail(format!("atomic rename failed: {}", e)));
        }

        tracing::debug!(
            "Archived {} bytes ({}) to {}",
            body.len(),
            content_type,
            full.display()
        );
        Ok(())
    }
}
