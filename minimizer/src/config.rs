use std::{path::PathBuf, time::Duration};

use common::config::{
    debugger::{DEFAULT_BACKTRACE_LEVELS, DEFAULT_DEBUGGER_TIMEOUT},
    minimizer::DEFAULT_MAX_TIME,
};

use crate::{distance::Metric, error::MinimizerError, target::TargetMode};

/// Configuration of a single minimization run.
#[derive(Debug, Clone)]
pub struct MinimizerConfig {
    pub target: TargetMode,
    pub metric: Metric,
    /// confidence that the target size guess is wrong before it is increased
    pub confidence: f64,
    /// `None` disables the timer
    pub max_time: Option<Duration>,
    /// upper bound for the calibrated debugger timeout
    pub debugger_timeout: Duration,
    pub backtrace_levels: usize,
    pub random_seed: Option<u64>,
    /// keep (re-derived) crashes with other signatures
    pub save_others: bool,
    /// parent of the scratch directory, system temp dir if unset
    pub scratch_dir: Option<PathBuf>,
    /// extension of the candidate file including the dot, e.g. `.pdf`
    pub extension: String,
    /// the current best file is copied here on every reduction
    pub output: Option<PathBuf>,
    pub progress_log: Option<PathBuf>,
}

impl MinimizerConfig {
    pub fn new(target: TargetMode) -> Self {
        Self {
            target,
            metric: Metric::default(),
            confidence: target.default_confidence(),
            max_time: Some(DEFAULT_MAX_TIME),
            debugger_timeout: DEFAULT_DEBUGGER_TIMEOUT,
            backtrace_levels: DEFAULT_BACKTRACE_LEVELS,
            random_seed: None,
            save_others: true,
            scratch_dir: None,
            extension: String::new(),
            output: None,
            progress_log: None,
        }
    }

    pub fn validate(&self) -> Result<(), MinimizerError> {
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(MinimizerError::Configuration(format!(
                "confidence must be within (0, 1): {}",
                self.confidence
            )));
        }

        if self.backtrace_levels == 0 {
            return Err(MinimizerError::Configuration(
                "backtrace depth must be at least 1".into(),
            ));
        }

        if self.debugger_timeout.is_zero() {
            return Err(MinimizerError::Configuration(
                "debugger timeout must not be zero".into(),
            ));
        }

        Ok(())
    }
}
