use std::{
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

pub fn bufreader(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .with_context(|| format!("Failed to open file {path:?}"))
        .map(BufReader::new)
}

pub fn bufwriter(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .with_context(|| format!("Failed to create file {path:?}"))
        .map(BufWriter::new)
}

pub fn appender(path: &Path) -> Result<BufWriter<File>> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open file {path:?} for appending"))
        .map(BufWriter::new)
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut content = vec![];
    bufreader(path)?
        .read_to_end(&mut content)
        .with_context(|| format!("Failed to read file {path:?}"))?;

    Ok(content)
}

pub fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    let mut writer = bufwriter(path)?;
    writer
        .write_all(content)
        .with_context(|| format!("Failed to write file {path:?}"))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush file {path:?}"))
}

/// Split a file name into root and extension (including the dot), e.g. `crash.pdf` => (`crash`, `.pdf`).
pub fn split_file_name(path: &Path) -> (String, String) {
    let root = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "noname".into());
    let ext = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    (root, ext)
}

/// `dir/<root><suffix><ext>` for a file named `<root><ext>`
pub fn sibling_path(dir: &Path, file: &Path, suffix: &str) -> PathBuf {
    let (root, ext) = split_file_name(file);
    dir.join(format!("{root}{suffix}{ext}"))
}
