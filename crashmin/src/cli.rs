use std::path::PathBuf;

use clap::{Args, Parser, ValueHint};
use common::{config::minimizer::DEFAULT_MIN_CHAR, log::LOG_INFO};

const CRASH: &str = "CRASH";
const FILE: &str = "FILE";
const PATH: &str = "PATH";

#[derive(Parser, Debug)]
#[command(name = "crashmin", rename_all = "kebab-case")]
pub struct Arguments {
    /// Target config file (program invocation, debugger timeout, backtrace depth)
    #[arg(long, value_hint = ValueHint::FilePath, display_order = 1)]
    pub config: PathBuf,

    /// Crashing input file
    #[arg(value_name = CRASH, value_hint = ValueHint::FilePath, display_order = 2)]
    pub crash_file: PathBuf,

    #[command(flatten)]
    pub target: ArgumentsTarget,

    #[command(flatten)]
    pub search: ArgumentsSearch,

    #[command(flatten)]
    pub output: ArgumentsOutput,

    #[arg(long, default_value = LOG_INFO, value_hint = ValueHint::FilePath, display_order = 700)]
    pub log_config: PathBuf,
}

#[derive(Args, Debug)]
#[command(rename_all = "kebab-case")]
pub struct ArgumentsTarget {
    /// Minimize towards the seed file the crash was fuzzed from
    #[arg(
        long,
        value_name = FILE,
        conflicts_with = "prefer_x",
        value_hint = ValueHint::FilePath,
        display_order = 10
    )]
    pub seed_file: Option<PathBuf>,

    /// Minimize towards a string of one repeated character instead of the pattern
    #[arg(long, display_order = 11)]
    pub prefer_x: bool,

    /// Character used with --prefer-x
    #[arg(long, value_name = "CHAR", default_value_t = DEFAULT_MIN_CHAR as char, display_order = 12)]
    pub min_char: char,
}

#[derive(Args, Debug)]
#[command(rename_all = "kebab-case")]
pub struct ArgumentsSearch {
    /// Use the bitwise instead of the bytewise Hamming distance
    #[arg(long, display_order = 20)]
    pub bitwise: bool,

    /// Confidence required to increase the target size guess [default: 0.999 for seed, 0.5 for string targets]
    #[arg(long, value_name = "CONFIDENCE", display_order = 21)]
    pub confidence: Option<f64>,

    /// Maximum minimization time in seconds, 0 disables the timer [default: 3600]
    #[arg(long, value_name = "SECONDS", display_order = 22)]
    pub max_time: Option<f64>,

    /// Seed of the random number generator
    #[arg(long, value_name = "SEED", display_order = 23)]
    pub random_seed: Option<u64>,
}

#[derive(Args, Debug)]
#[command(rename_all = "kebab-case")]
pub struct ArgumentsOutput {
    /// Parent directory of the scratch directory
    #[arg(long, value_name = PATH, value_hint = ValueHint::DirPath, display_order = 30)]
    pub tempdir: Option<PathBuf>,

    /// Directory for the minimized file and other crashes [default: directory of the crashing file]
    #[arg(long, value_name = PATH, value_hint = ValueHint::DirPath, display_order = 31)]
    pub output_dir: Option<PathBuf>,

    /// Minimizer progress log [default: <output-dir>/minimizer_log.txt]
    #[arg(long, value_name = FILE, value_hint = ValueHint::FilePath, display_order = 32)]
    pub logfile: Option<PathBuf>,

    /// Do not keep crashes with other signatures
    #[arg(long, display_order = 33)]
    pub no_others: bool,

    /// Print the run summary as YAML
    #[arg(long, display_order = 34)]
    pub yaml: bool,
}
