//! Build context packaging.
//!
//! Walks a source tree and writes it into an in-memory tar archive suitable
//! as a container engine build context. The walk is an explicit worklist in
//! lexicographic depth-first order, and headers carry deterministic metadata,
//! so an unchanged tree always packs to the same bytes.

use crate::error::{ArenaError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header, HeaderMode};
use tracing::{debug, instrument};

/// What a record in the archive represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Directory,
    File,
    /// Stored by target, never dereferenced.
    Symlink { target: PathBuf },
}

/// One archived filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    /// Path relative to the tree root.
    pub path: PathBuf,
    pub kind: RecordKind,
    /// Normalized permission bits written to the header.
    pub mode: u32,
    /// Content size in bytes (0 for directories and symlinks).
    pub size: u64,
}

/// A packed build context: the tar bytes and the records they contain, in order.
#[derive(Debug, Clone)]
pub struct PackedContext {
    records: Vec<ArchiveRecord>,
    tar: Vec<u8>,
}

impl PackedContext {
    pub fn records(&self) -> &[ArchiveRecord] {
        &self.records
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.tar
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.tar
    }
}

fn archive_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArenaError + '_ {
    move |source| ArenaError::ArchiveFailed { path: path.to_path_buf(), source }
}

/// Children of `dir`, sorted by file name.
fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut children = fs::read_dir(dir)
        .map_err(archive_err(dir))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(archive_err(dir))?;
    children.sort();
    Ok(children)
}

/// Pack `root` into a tar archive.
///
/// Fails on the first unreadable entry; no partial archive is returned.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn pack(root: &Path) -> Result<PackedContext> {
    let mut builder = Builder::new(Vec::new());
    let mut records = Vec::new();

    // Reversed so that popping yields lexicographic order
    let mut worklist = sorted_children(root)?;
    worklist.reverse();

    while let Some(path) = worklist.pop() {
        let meta = fs::symlink_metadata(&path).map_err(archive_err(&path))?;
        let relative = path
            .strip_prefix(root)
            .map_err(|e| ArenaError::ArchiveFailed {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })?
            .to_path_buf();

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&meta, HeaderMode::Deterministic);
        let file_type = meta.file_type();

        let (kind, size) = if file_type.is_symlink() {
            let target = fs::read_link(&path).map_err(archive_err(&path))?;
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &relative, &target).map_err(archive_err(&path))?;
            (RecordKind::Symlink { target }, 0)
        } else if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, &relative, std::io::empty())
                .map_err(archive_err(&path))?;

            let mut children = sorted_children(&path)?;
            children.reverse();
            worklist.extend(children);
            (RecordKind::Directory, 0)
        } else if file_type.is_file() {
            // Read fully so the header size always matches the bytes written
            let contents = fs::read(&path).map_err(archive_err(&path))?;
            header.set_entry_type(EntryType::Regular);
            header.set_size(contents.len() as u64);
            builder
                .append_data(&mut header, &relative, contents.as_slice())
                .map_err(archive_err(&path))?;
            (RecordKind::File, contents.len() as u64)
        } else {
            debug!("Skipping special file {}", path.display());
            continue;
        };

        records.push(ArchiveRecord {
            path: relative,
            kind,
            mode: header.mode().map_err(archive_err(&path))?,
            size,
        });
    }

    let tar = builder.into_inner().map_err(archive_err(root))?;
    debug!("Packed {} entries ({} bytes)", records.len(), tar.len());

    Ok(PackedContext { records, tar })
}

/// Pack `root` on the blocking thread pool.
pub async fn pack_blocking(root: PathBuf) -> Result<PackedContext> {
    let task_root = root.clone();
    tokio::task::spawn_blocking(move || pack(&task_root))
        .await
        .map_err(|e| ArenaError::ArchiveFailed { path: root, source: std::io::Error::other(e) })?
}
