use std::{
    borrow::Cow,
    fmt,
    io::{Cursor, Read, Write},
};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

const ZIP_MAGIC: &[u8] = b"PK";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Compression {
    Stored,
    Deflated,
    Unsupported(String),
}

impl From<CompressionMethod> for Compression {
    fn from(method: CompressionMethod) -> Self {
        match method {
            CompressionMethod::Stored => Self::Stored,
            CompressionMethod::Deflated => Self::Deflated,
            other => Self::Unsupported(format!("{other:?}")),
        }
    }
}

impl Compression {
    /// only stored and deflated members are re-encoded as such, others are written deflated
    fn method(&self) -> CompressionMethod {
        match self {
            Self::Stored => CompressionMethod::Stored,
            Self::Deflated => CompressionMethod::Deflated,
            Self::Unsupported(method) => {
                log::warn!(
                    "Compression type {} is not supported. Overriding with deflate",
                    method
                );
                CompressionMethod::Deflated
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    pub compression: Compression,
    pub is_dir: bool,
}

impl ArchiveEntry {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.length
    }
}

/// Member layout of a ZIP archive within the flat buffer, in archive order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveMap(Vec<ArchiveEntry>);

impl ArchiveMap {
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.0
    }

    pub fn flat_len(&self) -> usize {
        self.0.last().map(|entry| entry.range().end).unwrap_or(0)
    }
}

impl fmt::Display for ArchiveMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "{} [{:#x}..{:#x}] {:?}",
                entry.name,
                entry.offset,
                entry.range().end,
                entry.compression
            )?;
        }

        Ok(())
    }
}

/// A valid ZIP archive that starts with the local file header (no embedded archives).
pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC) && ZipArchive::new(Cursor::new(bytes)).is_ok()
}

/// Flat view over raw files or over the concatenated members of a ZIP archive.
#[derive(Debug, Clone, Default)]
pub struct ContentCodec {
    archive: Option<ArchiveMap>,
}

impl ContentCodec {
    /// Split `bytes` into the codec (container layout) and the flat content buffer.
    pub fn decode(bytes: &[u8]) -> Result<(Self, Vec<u8>)> {
        if !is_zip(bytes) {
            return Ok((Self::default(), bytes.to_vec()));
        }

        log::debug!("Reading files from zip...");
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).context("Failed to open zip archive")?;
        let mut entries = Vec::with_capacity(archive.len());
        let mut flat = vec![];

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .with_context(|| format!("Failed to read zip member {i}"))?;
            let offset = flat.len();
            file.read_to_end(&mut flat)
                .with_context(|| format!("Failed to decompress zip member {:?}", file.name()))?;

            entries.push(ArchiveEntry {
                name: file.name().to_owned(),
                offset,
                length: flat.len() - offset,
                compression: file.compression().into(),
                is_dir: file.is_dir(),
            });
        }

        let archive = ArchiveMap(entries);
        log::debug!("zip members: {}", archive);

        Ok((
            Self {
                archive: Some(archive),
            },
            flat,
        ))
    }

    pub fn archive(&self) -> Option<&ArchiveMap> {
        self.archive.as_ref()
    }

    /// Rebuild the container around a (mutated) flat buffer of unchanged length.
    pub fn encode<'a>(&self, flat: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let archive = match &self.archive {
            Some(archive) => archive,
            None => return Ok(Cow::Borrowed(flat)),
        };

        if flat.len() != archive.flat_len() {
            bail!(
                "flat buffer length {} does not match archive layout length {}",
                flat.len(),
                archive.flat_len()
            );
        }

        log::debug!("Creating zip with mutated contents.");
        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(flat.len())));

        for entry in archive.entries() {
            let options = SimpleFileOptions::default().compression_method(entry.compression.method());

            if entry.is_dir {
                writer
                    .add_directory(entry.name.clone(), options)
                    .with_context(|| format!("Failed to add zip directory {:?}", entry.name))?;
                continue;
            }

            writer
                .start_file(entry.name.clone(), options)
                .with_context(|| format!("Failed to add zip member {:?}", entry.name))?;
            writer
                .write_all(&flat[entry.range()])
                .with_context(|| format!("Failed to write zip member {:?}", entry.name))?;
        }

        writer
            .finish()
            .context("Failed to finish zip archive")
            .map(|cursor| Cow::Owned(cursor.into_inner()))
    }
}
