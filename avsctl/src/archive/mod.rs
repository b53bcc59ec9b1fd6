//! Tar archive construction with append support.
//!
//! A backup archive accumulates entries from several writers over time: each
//! snapshot job tars its volumes into the file, then the instance's data
//! directory is appended locally. The tar format allows this because a writer
//! may resume exactly at the end-of-archive marker: validate that the file
//! ends in the two all-zero 512-byte blocks, seek back over them, and write
//! further entries. The tar writer emits a fresh marker when it finishes, so
//! the file is a valid archive at every rest point between appends.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tar::Builder;
use thiserror::Error;
use walkdir::WalkDir;

/// Size of the end-of-archive marker: two 512-byte all-zero blocks.
pub const TERMINATOR_LEN: u64 = 1024;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("archive is not appendable: {0}")]
    NotAppendable(String),

    #[error("source path not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("source path is a directory: {}", .0.display())]
    SourceIsDirectory(PathBuf),

    #[error("walking directory tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Create a new, empty archive: exactly the two-block end-of-archive marker.
pub fn create_empty(path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&[0u8; TERMINATOR_LEN as usize])?;
    Ok(())
}

/// Position `stream` so that the next write overwrites the end-of-archive
/// marker with new entries.
///
/// An empty stream needs no positioning. A nonzero stream must be at least
/// marker-sized and must end in all-zero bytes; anything else is either
/// mid-write or corrupt and is rejected without modifying the file.
pub fn prepare_for_append<S: Read + Seek>(stream: &mut S) -> Result<()> {
    let len = stream.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(());
    }
    if len < TERMINATOR_LEN {
        return Err(ArchiveError::NotAppendable(format!(
            "file is {} bytes, smaller than the {}-byte end-of-archive marker",
            len, TERMINATOR_LEN
        )));
    }

    stream.seek(SeekFrom::End(-(TERMINATOR_LEN as i64)))?;
    let mut trailer = [0u8; TERMINATOR_LEN as usize];
    stream.read_exact(&mut trailer)?;
    if trailer.iter().any(|b| *b != 0) {
        return Err(ArchiveError::NotAppendable(
            "trailing bytes are not an all-zero end-of-archive marker".to_string(),
        ));
    }

    stream.seek(SeekFrom::End(-(TERMINATOR_LEN as i64)))?;
    Ok(())
}

/// Appends filesystem trees and single files to a tar stream.
///
/// The writer is typically a backup archive positioned by
/// [`prepare_for_append`]; [`TarAppender::finish`] writes the end-of-archive
/// marker that the next append strips again.
pub struct TarAppender<W: Write> {
    builder: Builder<W>,
}

impl<W: Write> TarAppender<W> {
    pub fn new(writer: W) -> Self {
        let mut builder = Builder::new(writer);
        builder.follow_symlinks(false);
        Self { builder }
    }

    /// Add every entry under `source_dir`, named `<prefix>/<relative path>`.
    ///
    /// Entries are written parents-first in a stable name order, so the same
    /// tree always produces the same entry sequence. Symlinks are archived as
    /// links, not followed.
    pub fn add_directory_tree(&mut self, source_dir: &Path, prefix: &str) -> Result<()> {
        if !source_dir.exists() {
            return Err(ArchiveError::SourceNotFound(source_dir.to_path_buf()));
        }

        for entry in WalkDir::new(source_dir)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry?;
            let rel = entry.path().strip_prefix(source_dir).unwrap_or(entry.path());
            let name = if rel.as_os_str().is_empty() {
                PathBuf::from(prefix)
            } else {
                Path::new(prefix).join(rel)
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                self.builder.append_dir(&name, entry.path())?;
            } else {
                // Regular files get their content; symlinks become link
                // entries because follow_symlinks is off.
                self.builder.append_path_with_name(entry.path(), &name)?;
            }
        }

        Ok(())
    }

    /// Add a single regular file under `dest_name`.
    pub fn add_file(&mut self, source: &Path, dest_name: &str) -> Result<()> {
        let metadata = match std::fs::metadata(source) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::SourceNotFound(source.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            return Err(ArchiveError::SourceIsDirectory(source.to_path_buf()));
        }

        let mut file = File::open(source)?;
        self.builder.append_file(dest_name, &mut file)?;
        Ok(())
    }

    /// Write the end-of-archive marker and return the underlying writer.
    pub fn finish(self) -> Result<W> {
        Ok(self.builder.into_inner()?)
    }
}
