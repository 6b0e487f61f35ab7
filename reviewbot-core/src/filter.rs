//! File filtering ahead of review.
//!
//! Removed files, oversized files, and binary files never reach the prompt.

use crate::clients::ChangedFile;

/// Thresholds for which changed files are reviewable.
#[derive(Debug, Clone)]
pub struct ReviewLimits {
    /// Files with more changed lines than this are skipped.
    pub max_changes_per_file: u64,
    /// Lowercased extensions that are never reviewed.
    pub binary_extensions: Vec<String>,
}

impl Default for ReviewLimits {
    fn default() -> Self {
        Self {
            max_changes_per_file: 1000,
            binary_extensions: [
                "png", "jpg", "jpeg", "gif", "ico", "svg", "pdf", "zip", "tar", "gz", "jar",
                "exe", "dll", "so", "dylib", "bin", "wasm", "woff", "woff2", "ttf", "eot",
                "mp3", "mp4", "webm", "lock",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl ReviewLimits {
    fn is_binary(&self, path: &str) -> bool {
        match path.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_ascii_lowercase();
                self.binary_extensions.iter().any(|e| e == &ext)
            }
            None => false,
        }
    }
}

/// Keep only files worth sending to the model: not removed, not oversized,
/// not binary.
pub fn filter_reviewable_files(files: Vec<ChangedFile>, limits: &ReviewLimits) -> Vec<ChangedFile> {
    files
        .into_iter()
        .filter(|f| f.status != "removed")
        .filter(|f| f.changes <= limits.max_changes_per_file)
        .filter(|f| !limits.is_binary(&f.path))
        .collect()
}
