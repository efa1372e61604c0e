use std::{
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressLine {
    pub start: usize,
    pub min: usize,
    pub target_guess: usize,
    pub curr: usize,
    pub chance: f64,
    pub misses: usize,
    pub misses_allowed: usize,
    pub total_misses: usize,
    pub total_tries: usize,
    pub unique_crashes: usize,
}

impl fmt::Display for ProgressLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "start={} min={} target_guess={} curr={} chance={:.5} miss={}/{} total_misses={}/{} u_crashes={}",
            self.start,
            self.min,
            self.target_guess,
            self.curr,
            self.chance,
            self.misses,
            self.misses_allowed,
            self.total_misses,
            self.total_tries,
            self.unique_crashes
        )
    }
}

/// Append-only progress log for operator diagnosis.
#[derive(Debug, Default)]
pub struct ProgressLog {
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl ProgressLog {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            path: Some(path.to_path_buf()),
            writer: Some(
                common::fs::appender(path).context("Failed to open minimizer progress log")?,
            ),
        })
    }

    /// log lines only go to the `log` facade
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn line(&mut self, line: &ProgressLine) -> Result<()> {
        log::info!("{}", line);
        self.write(&line.to_string())
    }

    pub fn note(&mut self, message: &str) -> Result<()> {
        log::info!("{}", message);
        self.write(message)
    }

    fn write(&mut self, message: &str) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writeln!(writer, "{message}")
                .and_then(|_| writer.flush())
                .context("Failed to write minimizer progress log")?;
        }

        Ok(())
    }
}
