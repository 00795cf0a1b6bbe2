// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::patch::PatchHunk;

/// Aggregated change record for one file path within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub file_path: String,
    /// Content observed before the first recorded change. Write-once.
    pub original_content: String,
    /// Most recently recorded content.
    pub current_content: String,
    pub hunks: Vec<PatchHunk>,
}

/// Thread-safe registry of file changes keyed by absolute path, coalescing
/// every recorded change per path so `original` always reflects the
/// pre-session content and `current`/`hunks` always reflect the latest state.
#[derive(Default)]
pub struct FileChangeStore {
    inner: Mutex<HashMap<String, FileChange>>,
}

impl FileChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// On first call per path, stores all four fields. On subsequent calls,
    /// preserves the stored `original` and overwrites `current`/`hunks`.
    pub fn record_change(
        &self,
        path: impl Into<String>,
        original: String,
        current: String,
        hunks: Vec<PatchHunk>,
    ) {
        let path = path.into();
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&path) {
            Some(existing) => {
                existing.current_content = current;
                existing.hunks = hunks;
            }
            None => {
                inner.insert(
                    path.clone(),
                    FileChange {
                        file_path: path,
                        original_content: original,
                        current_content: current,
                        hunks,
                    },
                );
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<FileChange> {
        self.inner.lock().unwrap().get(path).cloned()
    }

    /// Snapshot copy of every recorded change.
    pub fn get_all(&self) -> Vec<FileChange> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
