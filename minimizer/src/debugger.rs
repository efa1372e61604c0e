use std::{
    fmt,
    fs::File,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use common::config::debugger::{POLL_INTERVAL, SEEDFILE_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DebuggerError;

// markers of a sanitizer report in the program output
const SANITIZER_MARKERS: &[&str] = &[
    "ERROR: AddressSanitizer",
    "ERROR: LeakSanitizer",
    "WARNING: MemorySanitizer",
    "WARNING: ThreadSanitizer",
    "ERROR: UndefinedBehaviorSanitizer",
];
const UNKNOWN_FRAME: &str = "??";
// truncated SHA-256 digest length of a signature
const SIGNATURE_BYTES: usize = 16;

/// Normalized identifier of a crash, used to decide bug equivalence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CrashSignature(String);

impl CrashSignature {
    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }
}

impl fmt::Display for CrashSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a single debugger run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DebugResult {
    pub crash: bool,
    /// innermost frame first
    pub frames: Vec<String>,
    /// exit description, e.g. `signal 11`
    pub exit: Option<String>,
    /// a backtrace was reported, but none of its frames is usable
    pub total_stack_corruption: bool,
}

impl DebugResult {
    pub fn no_crash() -> Self {
        Self::default()
    }

    pub fn crash<S: Into<String>>(frames: impl IntoIterator<Item = S>) -> Self {
        Self {
            crash: true,
            frames: frames.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Hash of the innermost `depth` frames, `None` when the run did not crash.
    ///
    /// Signatures name persisted files, so the digest must be stable across builds.
    pub fn signature(&self, depth: usize) -> Option<CrashSignature> {
        if !self.crash {
            return None;
        }

        let hashable = if self.frames.is_empty() {
            self.exit.clone().unwrap_or_default()
        } else {
            self.frames
                .iter()
                .take(depth)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        };

        let digest = Sha256::digest(hashable.as_bytes());
        Some(CrashSignature(hex::encode(&digest[..SIGNATURE_BYTES])))
    }
}

/// Runs a candidate file through the target program.
pub trait Debugger {
    /// Run the program on `candidate`, debugger output is written to `output`.
    fn run(
        &mut self,
        candidate: &Path,
        output: &Path,
        timeout: Duration,
    ) -> Result<DebugResult, DebuggerError>;

    /// Deeper backtrace analysis used on total stack corruption.
    fn deep_backtrace(
        &mut self,
        _candidate: &Path,
        _output: &Path,
        _timeout: Duration,
    ) -> Result<Option<DebugResult>, DebuggerError> {
        Ok(None)
    }
}

impl<D: Debugger + ?Sized> Debugger for &mut D {
    fn run(
        &mut self,
        candidate: &Path,
        output: &Path,
        timeout: Duration,
    ) -> Result<DebugResult, DebuggerError> {
        (**self).run(candidate, output, timeout)
    }

    fn deep_backtrace(
        &mut self,
        candidate: &Path,
        output: &Path,
        timeout: Duration,
    ) -> Result<Option<DebugResult>, DebuggerError> {
        (**self).deep_backtrace(candidate, output, timeout)
    }
}

/// Spawns the target program and classifies its exit and stderr output.
#[derive(Debug, Clone)]
pub struct CommandDebugger {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandDebugger {
    pub fn new(program: PathBuf, args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            program,
            args,
            working_dir,
        }
    }

    pub fn command_line(&self, candidate: &Path) -> Vec<String> {
        let candidate = candidate.to_string_lossy();

        self.args
            .iter()
            .map(|arg| arg.replace(SEEDFILE_PLACEHOLDER, &candidate))
            .collect()
    }

    fn wait(
        child: &mut std::process::Child,
        timeout: Duration,
    ) -> Result<ExitStatus, DebuggerError> {
        let start = Instant::now();

        loop {
            if let Some(status) = child.try_wait().map_err(DebuggerError::Resource)? {
                return Ok(status);
            }

            if start.elapsed() > timeout {
                log::trace!("killing target after {:?}", start.elapsed());
                if let Err(err) = child.kill() {
                    log::debug!("failed to kill target {}: {}", child.id(), err);
                }
                if let Err(err) = child.wait() {
                    log::debug!("failed to reap target {}: {}", child.id(), err);
                }
                return Err(DebuggerError::Timeout);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Debugger for CommandDebugger {
    fn run(
        &mut self,
        candidate: &Path,
        output: &Path,
        timeout: Duration,
    ) -> Result<DebugResult, DebuggerError> {
        let stderr = File::create(output).map_err(DebuggerError::Resource)?;

        let mut command = Command::new(&self.program);
        command
            .args(self.command_line(candidate))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr));
        if let Some(working_dir) = &self.working_dir {
            command.current_dir(working_dir);
        }

        log::trace!("{:?}", command);
        let mut child = command.spawn().map_err(DebuggerError::Spawn)?;
        let status = Self::wait(&mut child, timeout)?;

        let report = std::fs::read(output).map_err(DebuggerError::Resource)?;
        parse_report(status_signal(&status), &String::from_utf8_lossy(&report))
    }
}

#[cfg(unix)]
fn status_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;

    status.signal()
}

#[cfg(not(unix))]
fn status_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Classify a finished run from its terminating signal and its output.
pub fn parse_report(signal: Option<i32>, report: &str) -> Result<DebugResult, DebuggerError> {
    let sanitizer = SANITIZER_MARKERS
        .iter()
        .any(|marker| report.contains(marker));
    let crash = signal.is_some() || sanitizer;

    let mut frames = vec![];
    let mut frame_lines = 0;
    for line in report.lines() {
        match parse_frame(line) {
            // only the first backtrace counts
            Some((0, _)) if frame_lines > 0 => break,
            Some((_, function)) => {
                frame_lines += 1;
                if function != UNKNOWN_FRAME {
                    frames.push(function.to_owned());
                }
            }
            None => {}
        }
    }

    if sanitizer && frame_lines == 0 {
        return Err(DebuggerError::MalformedOutput(
            "sanitizer report without backtrace".into(),
        ));
    }

    Ok(DebugResult {
        crash,
        total_stack_corruption: crash && frame_lines > 0 && frames.is_empty(),
        frames,
        exit: signal.map(|signal| format!("signal {signal}")),
    })
}

/// `#N 0xADDR in function ...`, `#N 0xADDR (module+0xOFF)` or `#N function (...)`
fn parse_frame(line: &str) -> Option<(usize, &str)> {
    let mut tokens = line.split_whitespace();
    let index = tokens.next()?.strip_prefix('#')?.parse().ok()?;

    let mut token = tokens.next()?;
    if token.starts_with("0x") {
        token = tokens.next().unwrap_or(UNKNOWN_FRAME);
        if token == "in" {
            token = tokens.next().unwrap_or(UNKNOWN_FRAME);
        }
    }

    Some((index, token))
}
