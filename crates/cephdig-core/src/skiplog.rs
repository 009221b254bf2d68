//! Structured log of everything an extraction deliberately skipped
//!
//! One record per skip decision, appended and flushed as it happens so a
//! run that is killed part way still leaves a complete log of what it
//! passed over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::InodeId;

/// Why an entry was not extracted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Directory metadata did not answer the reachability probe
    Timeout,
    NoMatch,
    TooLarge,
    TooSmall,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Timeout => "timeout",
            SkipReason::NoMatch => "no-match",
            SkipReason::TooLarge => "too-large",
            SkipReason::TooSmall => "too-small",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipRecord {
    pub reason: SkipReason,
    pub identifier: InodeId,
    /// Path relative to the extraction root
    pub path: PathBuf,
    /// File size; absent for skipped directories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl SkipRecord {
    pub fn new(reason: SkipReason, identifier: InodeId, path: PathBuf, size: Option<u64>) -> Self {
        Self {
            reason,
            identifier,
            path,
            size,
            timestamp: Utc::now(),
        }
    }

    /// Quoted CSV line without trailing newline
    pub fn to_csv(&self) -> String {
        let mut fields = vec![
            quote(self.reason.as_str()),
            quote(&self.identifier.to_string()),
            quote(&self.path.to_string_lossy()),
        ];
        if let Some(size) = self.size {
            fields.push(quote(&size.to_string()));
        }
        fields.join(",")
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipLogFormat {
    #[default]
    Csv,
    JsonLines,
}

/// Append-only skip log file
pub struct SkipLog {
    file: File,
    path: PathBuf,
    format: SkipLogFormat,
    records: usize,
}

impl SkipLog {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: impl AsRef<Path>, format: SkipLogFormat) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file,
            path,
            format,
            records: 0,
        })
    }

    pub fn record(&mut self, record: &SkipRecord) -> io::Result<()> {
        let line = match self.format {
            SkipLogFormat::Csv => record.to_csv(),
            SkipLogFormat::JsonLines => serde_json::to_string(record)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
        };
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Records written through this handle
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
