use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::protocol::{file_stem, InputFile, WorkItem};
use crate::{BatchError, Result};

/// Outstanding work computed from one snapshot of the input and output directories
#[derive(Debug, Default)]
pub struct WorkSet {
    /// Items still to be processed, ordered by input path
    pub items: Vec<WorkItem>,
    /// Inputs left out because their result document already exists
    pub already_done: Vec<InputFile>,
}

impl WorkSet {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Diffs recordings against existing result documents by file stem
#[derive(Debug, Clone)]
pub struct WorkSetResolver {
    audio_extension: String,
    result_extension: String,
}

impl WorkSetResolver {
    pub fn new(audio_extension: impl Into<String>, result_extension: impl Into<String>) -> Self {
        Self {
            audio_extension: audio_extension.into(),
            result_extension: result_extension.into(),
        }
    }

    /// Compute the work set; with `overwrite` every input is included
    pub async fn resolve(&self, input_dir: &Path, output_dir: &Path, overwrite: bool) -> Result<WorkSet> {
        let inputs = list_with_extension(input_dir, &self.audio_extension).await?;
        let outputs = list_with_extension(output_dir, &self.result_extension).await?;

        let done: HashSet<String> = outputs.iter().map(|p| file_stem(p)).collect();

        let mut work_set = WorkSet::default();
        for path in inputs {
            let input = InputFile::new(path);
            if !overwrite && done.contains(&input.stem()) {
                work_set.already_done.push(input);
            } else {
                work_set
                    .items
                    .push(WorkItem::new(input, output_dir, &self.result_extension));
            }
        }

        debug!(
            "Resolved {} item(s) to process, {} already done (overwrite={})",
            work_set.items.len(),
            work_set.already_done.len(),
            overwrite
        );

        Ok(work_set)
    }
}

/// Non-recursive listing of non-directory entries carrying `extension`, sorted by path
async fn list_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let access_error = |source| BatchError::DirectoryAccess {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(access_error)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(access_error)? {
        let path = entry.path();
        if path.extension() != Some(OsStr::new(extension)) {
            continue;
        }
        // Symlinks are kept without being followed; a broken one fails at read time
        let file_type = entry.file_type().await.map_err(access_error)?;
        if !file_type.is_dir() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
