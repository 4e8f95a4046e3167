// crates/edgegate-store-sqlite/src/bundle_zip.rs
// ============================================================================
// Module: Zip Bundle Container
// Description: Zip-backed sink and reader for evidence bundles.
// Purpose: Assemble and read `evidence.zip` without the builder knowing zip.
// Dependencies: edgegate-core, zip
// ============================================================================

//! ## Overview
//! The bundle builder in the core is container-agnostic; this module is the
//! production container. The sink streams entries into a zip as the builder
//! writes them, and the reader serves verification over a finished archive.
//! Entry timestamps are pinned so identical inputs produce identical
//! archives.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use edgegate_core::BundleReader;
use edgegate_core::BundleSink;
use edgegate_core::BundleSinkError;
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

// ============================================================================
// SECTION: Sink
// ============================================================================

/// Zip-backed bundle sink writing entries as they arrive.
pub struct ZipBundleSink {
    /// Open zip writer.
    writer: ZipWriter<File>,
    /// Destination path, returned on finish.
    path: PathBuf,
    /// Entry names already written; duplicates are rejected.
    written: BTreeSet<String>,
}

impl ZipBundleSink {
    /// Creates the archive at `path`, truncating any previous attempt.
    ///
    /// # Errors
    ///
    /// Returns [`BundleSinkError::Write`] when the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, BundleSinkError> {
        let file =
            File::create(path).map_err(|err| BundleSinkError::Write(err.to_string()))?;
        Ok(Self {
            writer: ZipWriter::new(file),
            path: path.to_path_buf(),
            written: BTreeSet::new(),
        })
    }

    /// Finalizes the archive and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`BundleSinkError::Write`] when the central directory cannot
    /// be written.
    pub fn finish(self) -> Result<PathBuf, BundleSinkError> {
        let writer = self.writer;
        writer.finish().map_err(|err| BundleSinkError::Write(err.to_string()))?;
        Ok(self.path)
    }

    /// Entry options: deflate with a pinned timestamp for determinism.
    fn entry_options() -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
    }
}

impl BundleSink for ZipBundleSink {
    fn write(&mut self, path: &str, bytes: &[u8]) -> Result<(), BundleSinkError> {
        if !self.written.insert(path.to_string()) {
            return Err(BundleSinkError::Write(format!("duplicate bundle entry {path}")));
        }
        self.writer
            .start_file(path, Self::entry_options())
            .map_err(|err| BundleSinkError::Write(err.to_string()))?;
        self.writer.write_all(bytes).map_err(|err| BundleSinkError::Write(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Reader over a finished `evidence.zip`.
pub struct ZipBundleReader {
    /// Archive contents loaded into memory for random access.
    entries: Vec<(String, Vec<u8>)>,
}

impl ZipBundleReader {
    /// Opens an archive from disk.
    ///
    /// # Errors
    ///
    /// Returns [`BundleSinkError::Read`] when the archive is unreadable.
    pub fn open(path: &Path) -> Result<Self, BundleSinkError> {
        let file = File::open(path).map_err(|err| BundleSinkError::Read(err.to_string()))?;
        Self::from_archive(ZipArchive::new(file).map_err(|err| {
            BundleSinkError::Read(err.to_string())
        })?)
    }

    /// Opens an archive from in-memory bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BundleSinkError::Read`] when the bytes are not a zip.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, BundleSinkError> {
        let cursor = std::io::Cursor::new(bytes);
        Self::from_archive(ZipArchive::new(cursor).map_err(|err| {
            BundleSinkError::Read(err.to_string())
        })?)
    }

    /// Drains an archive into the entry list.
    fn from_archive<R: Read + std::io::Seek>(
        mut archive: ZipArchive<R>,
    ) -> Result<Self, BundleSinkError> {
        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|err| BundleSinkError::Read(err.to_string()))?;
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|err| BundleSinkError::Read(err.to_string()))?;
            entries.push((entry.name().to_string(), bytes));
        }
        Ok(Self {
            entries,
        })
    }
}

impl BundleReader for ZipBundleReader {
    fn read(&self, path: &str) -> Result<Vec<u8>, BundleSinkError> {
        self.entries
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| BundleSinkError::Read(format!("missing bundle entry {path}")))
    }

    fn paths(&self) -> Result<Vec<String>, BundleSinkError> {
        Ok(self.entries.iter().map(|(name, _)| name.clone()).collect())
    }
}
