//! Loading Markdown files from disk as [`Document`]s.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};
use url::Url;

use docharvest_shared::{DocHarvestError, Document, Result};

/// Read a Markdown file into an unenhanced [`Document`].
///
/// The title is the first `# ` heading, or the file stem when there is none.
/// The URL is the file's absolute `file://` URL.
pub async fn load_markdown(path: &Path) -> Result<Document> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DocHarvestError::io(path, e))?;
    let absolute = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| DocHarvestError::io(path, e))?;
    let url = Url::from_file_path(&absolute).map_err(|()| {
        DocHarvestError::validation(format!("cannot build file URL for {}", absolute.display()))
    })?;

    let title = extract_title(&content).unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    Ok(Document::new(url.to_string(), title, content))
}

/// Expand `inputs` into Markdown file paths.
///
/// Files are taken as given. Directories contribute their `*.md` entries,
/// one level deep, in name order.
#[instrument(skip_all, fields(inputs = inputs.len()))]
pub async fn collect_markdown_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for input in inputs {
        let metadata = tokio::fs::metadata(input)
            .await
            .map_err(|e| DocHarvestError::io(input, e))?;
        if !metadata.is_dir() {
            paths.push(input.clone());
            continue;
        }

        let mut entries = tokio::fs::read_dir(input)
            .await
            .map_err(|e| DocHarvestError::io(input, e))?;
        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DocHarvestError::io(input, e))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if is_file && is_markdown(&path) {
                found.push(path);
            }
        }
        found.sort();
        debug!(dir = %input.display(), files = found.len(), "scanned directory");
        paths.extend(found);
    }

    Ok(paths)
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
}

fn extract_title(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE
        .captures(md)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}
