//! Output sinks for reconstructed trees
//!
//! Paths handed to a sink are relative to the extraction root. A sink
//! either mirrors them as loose files under a directory or appends them
//! to a gzip-compressed tar archive.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::reassemble::ReassemblyStats;

/// Producer of a file's bytes, called once with the writer to fill
pub type FileContents<'a> = dyn FnMut(&mut dyn Write) -> Result<ReassemblyStats> + 'a;

/// Destination of an extraction
pub trait OutputSink {
    /// Called before the walker descends into `path`
    fn enter_directory(&mut self, path: &Path) -> io::Result<()>;

    /// Called once the subtree under `path` is done, whatever its outcome
    fn leave_directory(&mut self, path: &Path) -> io::Result<()>;

    /// Store the file at `path`. When `contents` fails, nothing is left
    /// behind for that path and the error is returned.
    fn write_file(&mut self, path: &Path, contents: &mut FileContents<'_>)
        -> Result<ReassemblyStats>;

    /// Flush and close the output
    fn finish(&mut self) -> io::Result<()>;
}

/// Loose files under a root directory
pub struct LooseFiles {
    root: PathBuf,
}

impl LooseFiles {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl OutputSink for LooseFiles {
    fn enter_directory(&mut self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(self.root.join(path))
    }

    fn leave_directory(&mut self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn write_file(
        &mut self,
        path: &Path,
        contents: &mut FileContents<'_>,
    ) -> Result<ReassemblyStats> {
        let target = self.root.join(path);
        let mut writer = BufWriter::new(File::create(&target)?);

        let result = contents(&mut writer as &mut dyn Write);
        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                drop(writer);
                if let Err(remove_err) = fs::remove_file(&target) {
                    tracing::warn!("Could not remove partial {}: {}", target.display(), remove_err);
                }
                return Err(e);
            }
        };

        writer.flush()?;
        Ok(stats)
    }

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Gzip-compressed tar archive.
///
/// Each file is staged in a temporary file next to the archive, appended
/// under `<archive root>/<path>` and then deleted. Entered directories
/// are added as directory entries so empty ones survive.
pub struct TarGzArchive {
    builder: Option<tar::Builder<GzEncoder<File>>>,
    prefix: PathBuf,
    staging: PathBuf,
}

impl TarGzArchive {
    pub fn create(archive: impl AsRef<Path>) -> io::Result<Self> {
        let archive = archive.as_ref();
        let staging = match archive.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file = File::create(archive)?;
        let builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

        Ok(Self {
            builder: Some(builder),
            prefix: archive_root_name(archive),
            staging,
        })
    }

    /// Directory every entry of the archive lives under
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    fn builder(&mut self) -> io::Result<&mut tar::Builder<GzEncoder<File>>> {
        self.builder
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "archive already finished"))
    }
}

impl OutputSink for TarGzArchive {
    fn enter_directory(&mut self, path: &Path) -> io::Result<()> {
        let name = self.prefix.join(path);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        header.set_mtime(Utc::now().timestamp().max(0) as u64);
        self.builder()?.append_data(&mut header, name, io::empty())
    }

    fn leave_directory(&mut self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn write_file(
        &mut self,
        path: &Path,
        contents: &mut FileContents<'_>,
    ) -> Result<ReassemblyStats> {
        let mut staged = NamedTempFile::new_in(&self.staging)?;
        let stats = {
            let mut writer = BufWriter::new(staged.as_file_mut());
            let stats = contents(&mut writer as &mut dyn Write)?;
            writer.flush()?;
            stats
        };

        let name = self.prefix.join(path);
        self.builder()?.append_path_with_name(staged.path(), name)?;
        // the staged copy is deleted when `staged` drops
        Ok(stats)
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(builder) = self.builder.take() {
            let encoder = builder.into_inner()?;
            encoder.finish()?.sync_all()?;
        }
        Ok(())
    }
}

/// Archive file name without its `.tar.gz` / `.tgz` extension
pub fn archive_root_name(archive: &Path) -> PathBuf {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".tar.gz")
        .or_else(|| name.strip_suffix(".tgz"))
        .map(str::to_string)
        .or_else(|| {
            archive
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "extracted".to_string());
    PathBuf::from(stem)
}
