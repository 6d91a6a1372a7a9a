//! Fetches raw datasets that are not on disk yet.

use crate::builders::ensure_parent;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::with_suffix;
use std::path::Path;
use tracing::{debug, info};

/// Filtered Reddit TL;DR test split used for best-of-N generation.
pub const TLDR_TEST_URL: &str =
    "https://openaipublic.blob.core.windows.net/summarize-from-feedback/datasets/tldr_3_filtered/test.jsonl";

/// Downloads `url` to `dest` unless `dest` already exists.
///
/// The body lands in `{dest}.part` and is renamed once complete, so an interrupted
/// download never leaves a truncated `dest` behind.
pub async fn download_url(url: &str, dest: &Path) -> TrainingResult<()> {
    if dest.exists() {
        debug!(path = %dest.display(), "Already downloaded");
        return Ok(());
    }

    info!(url, dest = %dest.display(), "Downloading");
    let response = reqwest::get(url)
        .await
        .map_err(|e| TrainingError::Download(format!("{url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(TrainingError::Download(format!("{url}: HTTP {status}")));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| TrainingError::Download(format!("{url}: {e}")))?;

    ensure_parent(dest)?;
    let part = with_suffix(dest, ".part");
    std::fs::write(&part, &body)?;
    std::fs::rename(&part, dest)?;
    info!(path = %dest.display(), bytes = body.len(), "Downloaded");
    Ok(())
}
