//! Realized parts: fully drained part content, in memory or on disk.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use partstream_core::{Encoding, StreamingPart};

/// A part whose content has been fully drained out of the stream.
///
/// In-memory parts hold their bytes directly; disk-backed parts reference a
/// spooled temporary file that can be re-opened for any number of reads and
/// is deleted when the owning [`Parts`](crate::Parts) collection closes.
#[derive(Debug)]
pub struct RealizedPart {
    field_name: Option<String>,
    form_field: bool,
    content_type: Option<String>,
    file_name: Option<String>,
    headers: HashMap<String, String>,
    encoding: Encoding,
    storage: PartStorage,
    released: bool,
}

#[derive(Debug)]
enum PartStorage {
    InMemory { bytes: Vec<u8> },
    DiskBacked { path: PathBuf, len: u64 },
}

impl RealizedPart {
    pub(crate) fn in_memory<R: Read>(
        part: &StreamingPart<R>,
        bytes: Vec<u8>,
        encoding: Encoding,
    ) -> Self {
        Self {
            field_name: part.field_name().map(ToString::to_string),
            form_field: part.is_form_field(),
            content_type: part.content_type().map(ToString::to_string),
            file_name: part.file_name().map(ToString::to_string),
            headers: part.headers().clone(),
            encoding,
            storage: PartStorage::InMemory { bytes },
            released: false,
        }
    }

    pub(crate) fn disk_backed<R: Read>(
        part: &StreamingPart<R>,
        path: PathBuf,
        len: u64,
        encoding: Encoding,
    ) -> Self {
        Self {
            field_name: part.field_name().map(ToString::to_string),
            form_field: part.is_form_field(),
            content_type: part.content_type().map(ToString::to_string),
            file_name: part.file_name().map(ToString::to_string),
            headers: part.headers().clone(),
            encoding,
            storage: PartStorage::DiskBacked { path, len },
            released: false,
        }
    }

    /// The originating part's field name.
    #[must_use]
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    /// `true` for ordinary form fields.
    #[must_use]
    pub fn is_form_field(&self) -> bool {
        self.form_field
    }

    /// The originating part's `Content-Type`, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The originating part's filename parameter.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// The originating part's headers.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// `true` when the content is held in memory rather than on disk.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, PartStorage::InMemory { .. })
    }

    /// Content length in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.storage {
            PartStorage::InMemory { bytes } => bytes.len() as u64,
            PartStorage::DiskBacked { len, .. } => *len,
        }
    }

    /// Path of the spooled file, when disk-backed.
    #[must_use]
    pub fn spooled_path(&self) -> Option<&Path> {
        match &self.storage {
            PartStorage::InMemory { .. } => None,
            PartStorage::DiskBacked { path, .. } => Some(path.as_path()),
        }
    }

    /// Open a fresh reader over the content. Disk-backed parts open a new
    /// file handle each call.
    pub fn open_read(&self) -> io::Result<PartReader<'_>> {
        match &self.storage {
            PartStorage::InMemory { bytes } => Ok(PartReader {
                kind: ReaderKind::Memory(bytes.as_slice()),
            }),
            PartStorage::DiskBacked { path, .. } => Ok(PartReader {
                kind: ReaderKind::Disk(File::open(path)?),
            }),
        }
    }

    /// The content bytes, copied from memory or read back from disk.
    pub fn bytes(&self) -> io::Result<Vec<u8>> {
        match &self.storage {
            PartStorage::InMemory { bytes } => Ok(bytes.clone()),
            PartStorage::DiskBacked { path, .. } => std::fs::read(path),
        }
    }

    /// The content decoded with the encoding it was realized under.
    pub fn string(&self) -> io::Result<String> {
        match &self.storage {
            PartStorage::InMemory { bytes } => Ok(self.encoding.decode(bytes)),
            PartStorage::DiskBacked { path, .. } => {
                Ok(self.encoding.decode(&std::fs::read(path)?))
            }
        }
    }

    /// Delete the backing file, if any. Releasing more than once is a
    /// no-op; a file already gone is not an error.
    pub fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if let PartStorage::DiskBacked { path, .. } = &self.storage {
            debug!("removing spooled part file {}", path.display());
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl Drop for RealizedPart {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Reader over a realized part's content.
#[derive(Debug)]
pub struct PartReader<'a> {
    kind: ReaderKind<'a>,
}

#[derive(Debug)]
enum ReaderKind<'a> {
    Memory(&'a [u8]),
    Disk(File),
}

impl Read for PartReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            ReaderKind::Memory(slice) => slice.read(buf),
            ReaderKind::Disk(file) => file.read(buf),
        }
    }
}

static SPOOL_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Create a uniquely named spool file under `directory` (the platform temp
/// directory when `None`).
pub(crate) fn create_spool_file(
    stem: &str,
    directory: Option<&Path>,
) -> io::Result<(PathBuf, File)> {
    let directory = directory.map_or_else(std::env::temp_dir, Path::to_path_buf);
    let ts_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    for _ in 0..32 {
        let counter = SPOOL_COUNTER.fetch_add(1, Ordering::Relaxed);
        let candidate = directory.join(format!(
            "{stem}-{}-{ts_nanos}-{counter}.tmp",
            std::process::id()
        ));

        match OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "failed to allocate unique spool file",
    ))
}

/// Filename stem for a spool file, with path characters neutralized.
pub(crate) fn sanitize_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "part".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_spool_files_are_unique() {
        let dir = std::env::temp_dir();
        let (path_a, _a) = create_spool_file("unique-test", Some(&dir)).unwrap();
        let (path_b, _b) = create_spool_file("unique-test", Some(&dir)).unwrap();
        assert_ne!(path_a, path_b);
        std::fs::remove_file(&path_a).unwrap();
        std::fs::remove_file(&path_b).unwrap();
    }

    #[test]
    fn test_sanitize_stem_neutralizes_path_characters() {
        assert_eq!(sanitize_stem("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_stem(""), "part");
    }

    #[test]
    fn test_spool_file_is_writable_at_returned_path() {
        let (path, mut file) = create_spool_file("writable-test", None).unwrap();
        file.write_all(b"spooled").unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"spooled");
        std::fs::remove_file(&path).unwrap();
    }
}
