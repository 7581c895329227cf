//! Flatfile parsing.
//!
//! A flatfile lists candidate cloud members, one per line:
//!
//! ```text
//! # comments and blank lines are skipped
//! 10.0.0.1:54321
//! /10.0.0.2:54321
//! 10.0.0.3            # port defaults to 54321
//! [2001:db8::4]:54321
//! ```

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use floe_core::{DEFAULT_PORT, NodeIdentity};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlatfileError {
    #[error("failed to read flatfile {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("flatfile {path}, line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Read and parse a flatfile.
pub fn read_flatfile(path: &Path) -> Result<BTreeSet<NodeIdentity>, FlatfileError> {
    let content = std::fs::read_to_string(path).map_err(|source| FlatfileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_flatfile(&content, path)
}

/// Parse flatfile content. `path` is only used in error messages.
pub fn parse_flatfile(content: &str, path: &Path) -> Result<BTreeSet<NodeIdentity>, FlatfileError> {
    let mut entries = BTreeSet::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = match raw.split_once('#') {
            Some((before, _)) => before,
            None => raw,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        let identity =
            NodeIdentity::parse_entry(line, DEFAULT_PORT).map_err(|e| FlatfileError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                message: e.to_string(),
            })?;
        entries.insert(identity);
    }
    Ok(entries)
}
