use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use common::{
    config::{
        debugger::{DEFAULT_BACKTRACE_LEVELS, DEFAULT_DEBUGGER_TIMEOUT},
        minimizer::DEFAULT_MAX_TIME,
    },
    fs::{bufreader, sibling_path, split_file_name},
};
use minimizer::{CommandDebugger, Metric, MinimizerConfig, TargetMode};
use serde::{Deserialize, Serialize};

use crate::cli;

fn default_debugger_timeout() -> f64 {
    DEFAULT_DEBUGGER_TIMEOUT.as_secs_f64()
}

fn default_backtrace_levels() -> usize {
    DEFAULT_BACKTRACE_LEVELS
}

/// How to run the target program on a candidate file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub program: PathBuf,
    /// `$SEEDFILE` is replaced with the candidate path
    #[serde(default)]
    pub args: Vec<String>,
    /// seconds
    #[serde(default = "default_debugger_timeout")]
    pub debugger_timeout: f64,
    #[serde(default = "default_backtrace_levels")]
    pub backtrace_levels: usize,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl TargetConfig {
    pub fn read_from(path: &Path) -> Result<Self> {
        serde_yaml::from_reader(bufreader(path)?)
            .with_context(|| format!("Failed to parse target config file {path:?}"))
    }

    pub fn debugger_timeout(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.debugger_timeout)
            .with_context(|| format!("Invalid debugger timeout {}", self.debugger_timeout))
    }

    pub fn debugger(&self) -> CommandDebugger {
        CommandDebugger::new(
            self.program.clone(),
            self.args.clone(),
            self.working_dir.clone(),
        )
    }
}

#[derive(Debug)]
pub struct RunConfig {
    pub crash_file: PathBuf,
    pub seed_file: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub target: TargetConfig,
    pub minimizer: MinimizerConfig,
    pub yaml: bool,
}

impl RunConfig {
    pub fn from_cli(args: cli::Arguments) -> Result<Self> {
        let target_config = TargetConfig::read_from(&args.config)?;

        let target = match (&args.target.seed_file, args.target.prefer_x) {
            (Some(_), _) => TargetMode::Seed,
            (None, true) => TargetMode::Char(
                u8::try_from(args.target.min_char)
                    .with_context(|| format!("Invalid min char {:?}", args.target.min_char))?,
            ),
            (None, false) => TargetMode::Pattern,
        };

        let output_dir = match args.output.output_dir {
            Some(output_dir) => output_dir,
            None => args
                .crash_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };

        let mut minimizer = MinimizerConfig::new(target);
        minimizer.metric = if args.search.bitwise {
            Metric::Bitwise
        } else {
            Metric::Bytewise
        };
        if let Some(confidence) = args.search.confidence {
            minimizer.confidence = confidence;
        }
        minimizer.max_time = match args.search.max_time {
            Some(secs) if secs <= 0.0 => None,
            Some(secs) => Some(
                Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("Invalid max time {secs}"))?,
            ),
            None => Some(DEFAULT_MAX_TIME),
        };
        minimizer.debugger_timeout = target_config.debugger_timeout()?;
        minimizer.backtrace_levels = target_config.backtrace_levels;
        minimizer.random_seed = args.search.random_seed;
        minimizer.save_others = !args.output.no_others;
        minimizer.scratch_dir = args.output.tempdir;
        minimizer.extension = split_file_name(&args.crash_file).1;
        minimizer.output = Some(sibling_path(
            &output_dir,
            &args.crash_file,
            &target.output_suffix(),
        ));
        minimizer.progress_log = Some(
            args.output
                .logfile
                .unwrap_or_else(|| output_dir.join(target.log_file_name())),
        );
        minimizer.validate()?;

        Ok(Self {
            crash_file: args.crash_file,
            seed_file: args.target.seed_file,
            output_dir,
            target: target_config,
            minimizer,
            yaml: args.output.yaml,
        })
    }
}
