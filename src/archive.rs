//! Reading of packaged archives (`.rpm`).
//!
//! The payload of an rpm is a compressed cpio stream. We run the canonical
//! extract pipeline (`rpm2cpio`) to strip the rpm envelope, then hand the
//! payload to libarchive through compress-tools, which detects the
//! compression filter and archive format on its own.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use compress_tools::{ArchiveContents, ArchiveIterator};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot run extract pipeline for {0}: {1}")]
    Pipeline(String, io::Error),

    #[error("libarchive error: {0}")]
    Library(#[from] compress_tools::Error),

    #[error("malformed archive: {0}")]
    Malformed(&'static str),

    #[error("archive read error: {0}")]
    Io(#[from] io::Error),
}

/// Metadata of one archive entry, yielded by [`ArchiveReader::next_entry`].
#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub name: String,
    pub mode: u32,
    pub mtime: i64,
    pub size: u64,
}

impl EntryHeader {
    pub fn is_regular_file(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFREG
    }
}

/// A lazy, forward-only reader over an archive stream.
///
/// Call [`next_entry`](Self::next_entry) to advance; between two calls the
/// current entry's body can be copied out once with
/// [`extract_to`](Self::extract_to). Bodies that are not extracted are
/// skipped on the next advance.
pub struct ArchiveReader<R: Read + Seek> {
    entries: ArchiveIterator<R>,
}

impl<R: Read + Seek> ArchiveReader<R> {
    pub fn new(source: R) -> Result<Self, ArchiveError> {
        Ok(ArchiveReader {
            entries: ArchiveIterator::from_read(source)?,
        })
    }

    pub fn next_entry(&mut self) -> Result<Option<EntryHeader>, ArchiveError> {
        loop {
            match self.entries.next() {
                Some(ArchiveContents::StartOfEntry(name, stat)) => {
                    return Ok(Some(EntryHeader {
                        name,
                        mode: stat.st_mode,
                        mtime: stat.st_mtime,
                        size: stat.st_size.max(0) as u64,
                    }))
                }
                // Remnants of an entry the caller chose not to extract.
                Some(ArchiveContents::DataChunk(_)) | Some(ArchiveContents::EndOfEntry) => {
                    continue
                }
                Some(ArchiveContents::Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    /// Copy the current entry's body into `sink`. Must be called at most
    /// once per entry, and only for regular-file entries.
    pub fn extract_to<W: Write>(
        &mut self,
        _header: &EntryHeader,
        sink: &mut W,
    ) -> Result<u64, ArchiveError> {
        let mut copied = 0u64;
        loop {
            match self.entries.next() {
                Some(ArchiveContents::DataChunk(chunk)) => {
                    sink.write_all(&chunk)?;
                    copied += chunk.len() as u64;
                }
                Some(ArchiveContents::EndOfEntry) => return Ok(copied),
                Some(ArchiveContents::Err(e)) => return Err(e.into()),
                Some(ArchiveContents::StartOfEntry(..)) | None => {
                    return Err(ArchiveError::Malformed("truncated entry body"))
                }
            }
        }
    }
}

/// Run `rpm2cpio` and spool the payload into an anonymous temp file, since
/// libarchive wants a seekable source. The fd is the only handle; the OS
/// reclaims the bytes when it is dropped.
fn spool_extract_pipeline(path: &Path) -> Result<File, ArchiveError> {
    let mut child = Command::new("rpm2cpio")
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ArchiveError::Pipeline(path.display().to_string(), e))?;
    let mut stdout = child
        .stdout
        .take()
        .expect("child stdout was requested piped");

    let mut spool = tempfile::tempfile()?;
    let spooled = io::copy(&mut stdout, &mut spool);
    let status = child.wait()?;
    spooled?;
    if !status.success() {
        return Err(ArchiveError::Malformed("extract pipeline failed"));
    }
    spool.seek(SeekFrom::Start(0))?;
    Ok(spool)
}

/// Open an rpm on disk for entry iteration.
pub fn open_archive(path: &Path) -> Result<ArchiveReader<File>, ArchiveError> {
    ArchiveReader::new(spool_extract_pipeline(path)?)
}
