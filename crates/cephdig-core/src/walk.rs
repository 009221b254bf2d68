//! Depth-first reconstruction of a directory tree
//!
//! The walker lists a directory, decodes each entry, probes
//! subdirectories before descending into them and hands accepted files
//! to the reassembler. Failures stay local: an unreachable directory is
//! skipped and logged, a broken entry or a subtree that cannot be listed
//! is recorded as a failure, and traversal continues with the siblings.
//! Only output errors abort the walk.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::config::ExtractConfig;
use crate::error::{Result, SalvageError};
use crate::filter::{accept, Decision};
use crate::output::OutputSink;
use crate::probe::is_unreachable;
use crate::reassemble::reassemble;
use crate::record::DirectoryEntry;
use crate::resolve::list_entries;
use crate::skiplog::{SkipLog, SkipReason, SkipRecord};
use crate::store::Cluster;
use crate::{EntryFailure, ExtractedFile, ExtractionReport, InodeId};

/// Running totals handed to the progress callback
#[derive(Debug, Clone)]
pub struct ExtractionProgress {
    pub directories_visited: usize,
    pub files_extracted: usize,
    pub bytes_written: u64,
    pub skipped: usize,
    pub failures: usize,
    pub current_path: PathBuf,
}

pub struct TreeWalker<'a> {
    cluster: &'a dyn Cluster,
    config: &'a ExtractConfig,
    skip_log: Option<SkipLog>,
    progress_callback: Option<Box<dyn FnMut(&ExtractionProgress) + 'a>>,
    /// Directories on the current descent path
    ancestors: HashSet<InodeId>,
}

impl<'a> TreeWalker<'a> {
    pub fn new(cluster: &'a dyn Cluster, config: &'a ExtractConfig) -> Self {
        Self {
            cluster,
            config,
            skip_log: None,
            progress_callback: None,
            ancestors: HashSet::new(),
        }
    }

    /// Append every skip decision to `log`
    pub fn with_skip_log(mut self, log: SkipLog) -> Self {
        self.skip_log = Some(log);
        self
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&ExtractionProgress) + 'a,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    /// Extract the tree under directory `root` into `sink`.
    ///
    /// Failing to list `root` itself is fatal; everything below it is
    /// contained.
    pub fn run(mut self, root: InodeId, sink: &mut dyn OutputSink) -> Result<ExtractionReport> {
        let mut report = ExtractionReport::new(root);
        tracing::info!("Starting extraction of {} (run {})", root, report.run_id);

        self.ancestors.insert(root);
        let result = self.walk(root, sink, Path::new(""), &mut report);
        self.ancestors.remove(&root);
        result?;

        report.finished_at = Some(Utc::now());
        tracing::info!(
            "Extraction complete: {} files ({} bytes, {} zero-filled), {} skipped, {} failed",
            report.files.len(),
            report.total_bytes,
            report.zero_filled_bytes,
            report.skipped.len(),
            report.failures.len()
        );
        Ok(report)
    }

    fn walk(
        &mut self,
        id: InodeId,
        sink: &mut dyn OutputSink,
        dir_path: &Path,
        report: &mut ExtractionReport,
    ) -> Result<()> {
        let listing = list_entries(self.cluster, self.config, id)?;
        report.directories += 1;
        self.emit_progress(report, dir_path);

        for listed in listing {
            if !is_usable_name(listed.name()) {
                let error = SalvageError::InvalidEntryName {
                    key: listed.key.clone(),
                    name: listed.name().to_string(),
                };
                let identifier = listed.entry.as_ref().ok().map(|e| e.child_id);
                self.record_failure(report, dir_path.to_path_buf(), identifier, error)?;
                continue;
            }

            let path = dir_path.join(listed.name());
            let entry = match listed.entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.record_failure(report, path, None, e)?;
                    continue;
                }
            };

            if entry.is_directory() {
                self.visit_directory(&entry, sink, &path, report)?;
            } else {
                self.visit_file(&entry, sink, &path, report)?;
            }
        }
        Ok(())
    }

    fn visit_directory(
        &mut self,
        entry: &DirectoryEntry,
        sink: &mut dyn OutputSink,
        path: &Path,
        report: &mut ExtractionReport,
    ) -> Result<()> {
        if self.ancestors.contains(&entry.child_id) {
            let error = SalvageError::DirectoryCycle {
                child: entry.child_id,
            };
            return self.record_failure(report, path.to_path_buf(), Some(entry.child_id), error);
        }

        let unreachable = is_unreachable(
            self.cluster,
            &self.config.metadata_pool,
            entry.child_id,
            self.config.probe_timeout,
        );
        if unreachable {
            tracing::warn!(
                "Unable to extract {} as {} (timeout)",
                entry.child_id,
                path.display()
            );
            let record = SkipRecord::new(
                SkipReason::Timeout,
                entry.child_id,
                path.to_path_buf(),
                None,
            );
            return self.skip(report, record);
        }

        tracing::debug!("Entering directory {}", path.display());
        sink.enter_directory(path)?;
        self.ancestors.insert(entry.child_id);
        let result = self.walk(entry.child_id, sink, path, report);
        self.ancestors.remove(&entry.child_id);
        sink.leave_directory(path)?;

        match result {
            Err(e) if e.is_contained() => {
                self.record_failure(report, path.to_path_buf(), Some(entry.child_id), e)
            }
            other => other,
        }
    }

    fn visit_file(
        &mut self,
        entry: &DirectoryEntry,
        sink: &mut dyn OutputSink,
        path: &Path,
        report: &mut ExtractionReport,
    ) -> Result<()> {
        let decision = accept(&entry.name, entry.size, &self.config.filter);
        if let Some(reason) = decision.skip_reason() {
            tracing::debug!(
                "Refusing to extract {} ({} bytes): {}",
                path.display(),
                entry.size,
                reason
            );
            let record = SkipRecord::new(reason, entry.child_id, path.to_path_buf(), Some(entry.size));
            return self.skip(report, record);
        }
        debug_assert_eq!(decision, Decision::Accept);

        tracing::debug!(
            "Extracting file {}, size {}, inode {}",
            path.display(),
            entry.size,
            entry.child_id
        );

        let cluster = self.cluster;
        let (id, pool_id, size) = (entry.child_id, entry.pool_id, entry.size);
        let result = sink.write_file(path, &mut |writer: &mut dyn Write| {
            reassemble(cluster, id, pool_id, size, writer)
        });

        match result {
            Ok(stats) => {
                if stats.zero_filled_bytes > 0 {
                    tracing::warn!(
                        "{}: {} of {} bytes zero-filled ({} segments missing)",
                        path.display(),
                        stats.zero_filled_bytes,
                        size,
                        stats.missing_segments
                    );
                }
                report.total_bytes += stats.bytes_written;
                report.zero_filled_bytes += stats.zero_filled_bytes;
                report.files.push(ExtractedFile {
                    path: path.to_path_buf(),
                    identifier: id,
                    pool_id,
                    size,
                    stats,
                });
                self.emit_progress(report, path);
                Ok(())
            }
            Err(e) if e.is_contained() => self.record_failure(report, path.to_path_buf(), Some(id), e),
            Err(e) => Err(e),
        }
    }

    fn skip(&mut self, report: &mut ExtractionReport, record: SkipRecord) -> Result<()> {
        if let Some(log) = self.skip_log.as_mut() {
            log.record(&record)?;
        }
        let path = record.path.clone();
        report.skipped.push(record);
        self.emit_progress(report, &path);
        Ok(())
    }

    fn record_failure(
        &mut self,
        report: &mut ExtractionReport,
        path: PathBuf,
        identifier: Option<InodeId>,
        error: SalvageError,
    ) -> Result<()> {
        tracing::warn!("Failed to process {}: {}", path.display(), error);
        report.failures.push(EntryFailure {
            path,
            identifier,
            error: error.to_string(),
        });
        Ok(())
    }

    fn emit_progress(&mut self, report: &ExtractionReport, current: &Path) {
        if let Some(callback) = self.progress_callback.as_mut() {
            callback(&ExtractionProgress {
                directories_visited: report.directories,
                files_extracted: report.files.len(),
                bytes_written: report.total_bytes,
                skipped: report.skipped.len(),
                failures: report.failures.len(),
                current_path: current.to_path_buf(),
            });
        }
    }
}

/// Whether `name` is a single, plain path component
fn is_usable_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(|c: char| c == '/' || c == '\0')
}
