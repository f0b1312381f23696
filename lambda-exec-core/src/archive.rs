// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Streaming gzip + tar extraction.
//!
//! Entries are processed one at a time in archive order and never buffered
//! in full. Only directories and regular files are materialized; every
//! other entry type is skipped. Extraction is not transactional: a failure
//! leaves whatever was already written in place, and a later run over the
//! same destination overwrites it.

use std::fs::{DirBuilder, File, OpenOptions, Permissions};
use std::io::{self, Cursor, ErrorKind, Read, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tar::{Archive, EntryType};
use tokio_util::io::SyncIoBridge;

use crate::error::ExtractError;
use crate::fetch::ArtifactStream;

/// Mode of every directory created during extraction.
pub const DIR_MODE: u32 = 0o755;

/// Leading bytes of every gzip member.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Size of one tar header block.
const TAR_BLOCK_SIZE: usize = 512;

/// Copy buffer size for file contents.
const COPY_BUF_SIZE: usize = 64 * 1024;

/// Counters reported after a successful extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    pub skipped: usize,
    pub bytes: u64,
}

/// Destination directory of one artifact, `<code_dir>/<object>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTarget {
    path: PathBuf,
}

impl ExtractionTarget {
    /// Key the destination by object id. An id that would climb out of
    /// `code_dir` is rejected.
    pub fn new(code_dir: &Path, object: &str) -> Result<Self, ExtractError> {
        let relative =
            contained_path(Path::new(object)).ok_or_else(|| ExtractError::UnsafePath {
                entry: PathBuf::from(object),
            })?;
        Ok(Self {
            path: code_dir.join(relative),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory (and parents) if missing.
    pub fn prepare(&self) -> Result<(), ExtractError> {
        create_dirs(&self.path)
    }
}

/// Extract a gzip-compressed tar stream read from async storage.
///
/// The archive is unpacked on the blocking pool; reads from `stream` are
/// bridged back onto the runtime.
pub async fn extract_stream(
    stream: ArtifactStream,
    destination: &Path,
) -> Result<ExtractSummary, ExtractError> {
    let reader = SyncIoBridge::new(stream);
    let destination = destination.to_path_buf();

    tokio::task::spawn_blocking(move || extract(reader, &destination))
        .await
        .map_err(|e| ExtractError::Task {
            reason: e.to_string(),
        })?
}

/// Extract a gzip-compressed tar stream into `destination`.
pub fn extract<R: Read>(mut reader: R, destination: &Path) -> Result<ExtractSummary, ExtractError> {
    tracing::debug!(destination = %destination.display(), "Start unarchiving tarball");

    let mut magic = [0u8; 2];
    reader
        .read_exact(&mut magic)
        .map_err(|e| decompress_error("failed to read gzip header", e))?;
    if magic != GZIP_MAGIC {
        return Err(ExtractError::Decompress {
            reason: format!("bad magic bytes {:02x}{:02x}", magic[0], magic[1]),
        });
    }

    // Decoding the first tar block forces the full gzip header to be parsed
    let mut decoder = MultiGzDecoder::new(Cursor::new(magic).chain(reader));
    let mut head = Vec::with_capacity(TAR_BLOCK_SIZE);
    (&mut decoder)
        .take(TAR_BLOCK_SIZE as u64)
        .read_to_end(&mut head)
        .map_err(|e| decompress_error("invalid gzip stream", e))?;

    let mut archive = Archive::new(Cursor::new(head).chain(decoder));
    let mut summary = ExtractSummary::default();

    let entries = archive
        .entries()
        .map_err(|source| ExtractError::Read { source })?;

    for entry in entries {
        let mut entry = entry.map_err(|source| ExtractError::Read { source })?;
        let name = entry
            .path()
            .map_err(|source| ExtractError::Read { source })?
            .into_owned();

        let entry_type = entry.header().entry_type();
        if !matches!(entry_type, EntryType::Directory | EntryType::Regular) {
            tracing::debug!(entry = %name.display(), kind = ?entry_type, "Skipping entry");
            summary.skipped += 1;
            continue;
        }

        let relative = contained_path(&name).ok_or_else(|| {
            tracing::warn!(entry = %name.display(), "Rejecting entry outside destination");
            ExtractError::UnsafePath {
                entry: name.clone(),
            }
        })?;
        let target = destination.join(relative);

        tracing::debug!(entry = %name.display(), target = %target.display(), "Processing entry");

        if entry_type == EntryType::Directory {
            if !target.is_dir() {
                create_dirs(&target)?;
            }
            summary.directories += 1;
        } else {
            let mode = entry
                .header()
                .mode()
                .map_err(|source| ExtractError::Read { source })?
                & 0o777;
            summary.bytes += write_file(&mut entry, &target, mode)?;
            summary.files += 1;
        }
    }

    tracing::debug!(
        destination = %destination.display(),
        directories = summary.directories,
        files = summary.files,
        skipped = summary.skipped,
        bytes = summary.bytes,
        "End unarchiving tarball"
    );

    Ok(summary)
}

/// Map a failure while decoding the gzip header. A timed out body read
/// stays a read error so callers can tell it apart from bad input.
fn decompress_error(context: &str, e: io::Error) -> ExtractError {
    if e.kind() == ErrorKind::TimedOut {
        return ExtractError::Read { source: e };
    }
    ExtractError::Decompress {
        reason: format!("{}: {}", context, e),
    }
}

/// Lexically resolve `name` relative to a root directory.
///
/// Root and prefix components are dropped, `.` is ignored and `..` pops a
/// previous component. Returns `None` when `..` would climb above the root.
fn contained_path(name: &Path) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::Normal(part) => resolved.push(part),
        }
    }
    Some(resolved)
}

fn create_dirs(path: &Path) -> Result<(), ExtractError> {
    DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(path)
        .map_err(|source| ExtractError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Write one regular file entry, truncating any previous content.
/// The handle is closed before returning.
fn write_file<R: Read>(entry: &mut R, target: &Path, mode: u32) -> Result<u64, ExtractError> {
    if let Some(parent) = target.parent() {
        if !parent.is_dir() {
            create_dirs(parent)?;
        }
    }

    let write_err = |source: io::Error| ExtractError::Write {
        path: target.to_path_buf(),
        source,
    };

    let mut file = match open_truncate(target, mode) {
        Err(e) if e.kind() == ErrorKind::PermissionDenied && target.is_file() => {
            // Read-only leftover from an earlier extraction
            std::fs::remove_file(target).map_err(write_err)?;
            open_truncate(target, mode).map_err(write_err)?
        }
        other => other.map_err(write_err)?,
    };
    file.set_permissions(Permissions::from_mode(mode))
        .map_err(write_err)?;

    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut written = 0u64;
    loop {
        let n = match entry.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => return Err(ExtractError::Read { source }),
        };
        file.write_all(&buf[..n]).map_err(write_err)?;
        written += n as u64;
    }
    file.flush().map_err(write_err)?;

    Ok(written)
}

fn open_truncate(target: &Path, mode: u32) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(target)
}
