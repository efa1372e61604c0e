pub mod minimizer {
    use std::time::Duration;

    // abort minimization early when more than this many other crashes show up
    pub const MAX_OTHER_CRASHES: usize = 20;

    // keep re-running the unmodified crash until we are 0.95 confident that
    // any crash signature we did not see yet has a probability below 0.5
    pub const SAMPLER_CONFIDENCE: f64 = 0.95;
    pub const SAMPLER_HIT_PROBABILITY: f64 = 0.5;

    // debugger timeout = mean + z * stddev of the crashing sample runs (one-sided 95%)
    pub const TIMEOUT_ZSCORE: f64 = 1.645;

    // confidence that the current target size guess is wrong before increasing it
    pub const DEFAULT_CONFIDENCE_SEED: f64 = 0.999;
    pub const DEFAULT_CONFIDENCE_STRING: f64 = 0.5;

    pub const DEFAULT_MAX_TIME: Duration = Duration::from_secs(3600);
    pub const DEFAULT_MIN_CHAR: u8 = b'x';

    // Beta distribution priors
    pub const BETA_PRIOR_ALPHA: f64 = 1.0;
    pub const BETA_PRIOR_BETA: f64 = 1.0;

    pub const SCRATCH_DIR_PREFIX: &str = "minimizer_";
    pub const CANDIDATE_FILE_PREFIX: &str = "minimizer_fuzzed_file_";
    pub const SAMPLER_OUTPUT_PREFIX: &str = "minimizer_set_crash_hashes_";
    pub const TRIAL_OUTPUT_PREFIX: &str = "minimizer_is_same_crash_";
    pub const OTHER_CRASH_PREFIX: &str = "minimizer_crash_builder_";
}

pub mod debugger {
    use std::time::Duration;

    pub const DEFAULT_DEBUGGER_TIMEOUT: Duration = Duration::from_secs(10);
    // lower bound of the calibrated timeout (process spawn jitter)
    pub const MIN_DEBUGGER_TIMEOUT: Duration = Duration::from_millis(100);
    pub const DEFAULT_BACKTRACE_LEVELS: usize = 5;

    // deep backtrace analyzers (total stack corruption) hash more frames
    pub const DEEP_BACKTRACE_FACTOR: usize = 10;

    // replaced with the candidate path in the program arguments
    pub const SEEDFILE_PLACEHOLDER: &str = "$SEEDFILE";

    pub const POLL_INTERVAL: Duration = Duration::from_millis(5);
}

pub mod target {
    // classic non-repeating pattern "Aa0Aa1...Zz9", rolls over every 26 * 26 * 10 * 3 bytes
    pub const PATTERN_UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    pub const PATTERN_LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    pub const PATTERN_DIGITS: &[u8] = b"0123456789";
    pub const PATTERN_PERIOD: usize = 26 * 26 * 10 * 3;
}
