use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use common::{
    config::minimizer::{
        CANDIDATE_FILE_PREFIX, MAX_OTHER_CRASHES, OTHER_CRASH_PREFIX, SCRATCH_DIR_PREFIX,
        TRIAL_OUTPUT_PREFIX,
    },
    content_hash,
    error::LogError,
    time::Deadline,
    FxHashMap, FxHashSet,
};
use serde::Serialize;
use tempfile::{NamedTempFile, TempDir};

use crate::{
    config::MinimizerConfig,
    content::{ArchiveMap, ContentCodec},
    debugger::{CrashSignature, Debugger},
    distance::{differing_positions, Metric},
    error::MinimizerError,
    probability::{beta_estimate, miss_budget, BetaEstimate},
    progress::{ProgressLine, ProgressLog},
    signature::{fatal, run_signature, CrashSignatureSet, SignatureSampler},
    target::TargetMode,
};

/// The crash to minimize.
#[derive(Debug, Clone)]
pub struct Crash {
    /// crashing file content (possibly a ZIP archive)
    pub content: Vec<u8>,
    /// seed file content, required to minimize towards the seed
    pub seed: Option<Vec<u8>>,
    /// file name root used for other crash files, e.g. the seed file name
    pub name: Option<String>,
}

impl Crash {
    pub fn new(content: Vec<u8>, seed: Option<Vec<u8>>) -> Self {
        Self {
            content,
            seed,
            name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Init,
    Sampling,
    Searching,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DoneReason {
    /// the best candidate is one position away from the target
    SingleByte,
    /// every candidate closer than the current minimum was tried
    SearchedAll,
    /// every candidate exactly one position closer was tried
    TriedAllSingleReductions,
    /// crash signatures are unstable while minimizing towards the seed
    TooManyOtherCrashes,
}

impl fmt::Display for DoneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SingleByte => "minimal distance of 1 reached",
            Self::SearchedAll => "searched all closer candidates",
            Self::TriedAllSingleReductions => "tried all single reductions",
            Self::TooManyOtherCrashes => "too many other crashes",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    Done(DoneReason),
    Exhausted,
    TimedOut,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done(reason) => write!(f, "done ({reason})"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchState {
    pub target_size_guess: usize,
    pub discard_chance: f64,
    pub misses_allowed: usize,
    pub consecutive_misses: usize,
    pub total_misses: usize,
    pub total_tries: usize,
    /// accepted reductions
    pub hits: usize,
    /// distance of the last generated candidate
    pub current_distance: usize,
}

/// Crash with a signature outside of the wanted set, re-derived from a copy.
#[derive(Debug, Clone, Serialize)]
pub struct OtherCrash {
    pub distance: usize,
    #[serde(skip)]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelTries {
    /// distinct candidates tried at this minimum
    pub tried: usize,
    /// distinct candidates exactly one position closer
    pub single_reductions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IterationSnapshot {
    pub min_distance: usize,
    pub target_size_guess: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MinimizationReport {
    pub termination: Termination,
    pub target: TargetMode,
    pub metric: Metric,
    pub start_distance: usize,
    pub min_distance: usize,
    /// positions where the minimized content differs from the target
    pub bytemap: Vec<usize>,
    pub signatures: CrashSignatureSet,
    pub crash_sigs_found: BTreeMap<CrashSignature, usize>,
    pub other_crashes: BTreeMap<CrashSignature, OtherCrash>,
    pub files_tried: usize,
    pub exhaustiveness: BTreeMap<usize, LevelTries>,
    pub iterations: Vec<IterationSnapshot>,
    pub total_tries: usize,
    pub total_misses: usize,
    /// estimated probability that a trial yields a reduction
    pub success_rate: BetaEstimate,
    pub debugger_runs: usize,
    pub timeout: Duration,
    pub elapsed: Duration,
    pub archive: Option<ArchiveMap>,
    /// minimized file (re-encoded container)
    #[serde(skip)]
    pub content: Vec<u8>,
    #[serde(skip)]
    pub flat: Vec<u8>,
}

/// Scratch files of a single trial, removed on every exit path.
struct TrialFiles<'a> {
    candidate: &'a Path,
    output: NamedTempFile,
}

impl<'a> TrialFiles<'a> {
    fn create(candidate: &'a Path, scratch: &Path, content: &[u8]) -> Result<Self> {
        let output = tempfile::Builder::new()
            .prefix(TRIAL_OUTPUT_PREFIX)
            .tempfile_in(scratch)
            .map_err(MinimizerError::Resource)
            .context("Failed to create debugger output file")?;

        fs::write(candidate, content)
            .map_err(MinimizerError::Resource)
            .with_context(|| format!("Failed to write candidate file {candidate:?}"))?;

        Ok(Self { candidate, output })
    }

    fn output(&self) -> &Path {
        self.output.path()
    }
}

impl Drop for TrialFiles<'_> {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(self.candidate) {
            log::debug!("failed to remove candidate file {:?}: {}", self.candidate, err);
        }
    }
}

struct Trial {
    encoded: Vec<u8>,
    same_crash: bool,
}

/// Probabilistic Hamming distance minimization of a crashing input.
///
/// Positions where the crash differs from the target are randomly reverted to the target
/// value. A candidate that still crashes with one of the sampled signatures becomes the new
/// best candidate. The guess of the minimal distance grows whenever enough misses in a row
/// make the current guess unlikely.
pub struct MinimizationEngine<D: Debugger> {
    config: MinimizerConfig,
    debugger: D,
    state: EngineState,
    search: SearchState,
    rng: fastrand::Rng,
    codec: ContentCodec,
    name: String,

    target: Vec<u8>,
    best: Vec<u8>,
    best_encoded: Vec<u8>,
    start_distance: usize,
    min_distance: usize,

    signatures: CrashSignatureSet,
    timeout: Duration,
    deadline: Deadline,

    files_tried: FxHashMap<u64, usize>,
    tried_at_distance: FxHashMap<usize, FxHashSet<u64>>,
    single_reductions_at_distance: FxHashMap<usize, FxHashSet<u64>>,
    crash_sigs_found: FxHashMap<CrashSignature, usize>,
    other_crashes: FxHashMap<CrashSignature, OtherCrash>,
    too_many_other_crashes: bool,
    iterations: Vec<IterationSnapshot>,
    debugger_runs: usize,

    scratch: TempDir,
    candidate: PathBuf,
    progress: ProgressLog,
}

impl<D: Debugger> MinimizationEngine<D> {
    pub fn new(config: MinimizerConfig, debugger: D, crash: Crash) -> Result<Self> {
        config.validate()?;

        let (codec, flat) =
            ContentCodec::decode(&crash.content).context("Failed to decode crashing file")?;
        let seed = match (&crash.seed, config.target.is_seed()) {
            (Some(seed), true) => Some(
                ContentCodec::decode(seed)
                    .context("Failed to decode seed file")?
                    .1,
            ),
            _ => None,
        };
        let target = config.target.build(seed.as_deref(), flat.len())?;
        let start_distance = config.metric.distance(&target, &flat)?;

        let rng = match config.random_seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_DIR_PREFIX);
        let scratch = match &config.scratch_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(MinimizerError::Resource)
        .context("Failed to create scratch directory")?;

        // programs may behave differently depending on the path, keep it fixed for the run
        let candidate = scratch.path().join(format!(
            "{}{:08x}{}",
            CANDIDATE_FILE_PREFIX,
            rng.u32(..),
            config.extension
        ));

        let progress = match &config.progress_log {
            Some(path) => ProgressLog::open(path)?,
            None => ProgressLog::disabled(),
        };
        if let Some(path) = progress.path() {
            log::info!("Progress log: {:?}", path);
        }

        log::debug!(
            "minimizing towards {} with {} distance {} (scratch dir {:?})",
            config.target,
            config.metric,
            start_distance,
            scratch.path()
        );

        Ok(Self {
            name: crash.name.unwrap_or_else(|| match config.target {
                TargetMode::Seed => "seed".into(),
                _ => "string".into(),
            }),
            search: SearchState {
                target_size_guess: 1,
                ..SearchState::default()
            },
            timeout: config.debugger_timeout,
            deadline: Deadline::start(config.max_time),
            config,
            debugger,
            state: EngineState::Init,
            rng,
            codec,
            target,
            best: flat,
            best_encoded: crash.content,
            start_distance,
            min_distance: start_distance,
            signatures: CrashSignatureSet::new(),
            files_tried: FxHashMap::default(),
            tried_at_distance: FxHashMap::default(),
            single_reductions_at_distance: FxHashMap::default(),
            crash_sigs_found: FxHashMap::default(),
            other_crashes: FxHashMap::default(),
            too_many_other_crashes: false,
            iterations: vec![],
            debugger_runs: 0,
            scratch,
            candidate,
            progress,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn search_state(&self) -> &SearchState {
        &self.search
    }

    pub fn start_distance(&self) -> usize {
        self.start_distance
    }

    pub fn min_distance(&self) -> usize {
        self.min_distance
    }

    pub fn target(&self) -> &[u8] {
        &self.target
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn run(&mut self) -> Result<MinimizationReport> {
        if self.state != EngineState::Init {
            bail!("minimization already ran ({:?})", self.state);
        }
        self.deadline = Deadline::start(self.config.max_time);

        self.state = EngineState::Sampling;
        self.sample()?;

        // the unmodified crash is the best fit so far
        if let Some(output) = &self.config.output {
            common::fs::write_file(output, &self.best_encoded).log_error();
        }

        log::info!(
            "Attempting to minimize crash(es) [{}]",
            self.signatures_string()
        );
        self.state = EngineState::Searching;
        let termination = self.search()?;
        self.state = EngineState::Finished;

        log::info!("Minimization {}", termination);
        self.final_log()?;

        Ok(self.report(termination))
    }

    fn sample(&mut self) -> Result<()> {
        let files = TrialFiles::create(&self.candidate, self.scratch.path(), &self.best_encoded)?;
        let mut sampler = SignatureSampler::new(
            &mut self.debugger,
            self.scratch.path(),
            self.config.backtrace_levels,
            self.config.debugger_timeout,
        );
        let outcome = sampler.sample(files.candidate);
        drop(files);

        let outcome = outcome?;
        self.debugger_runs += outcome.runs;
        self.signatures = outcome.signatures;
        self.timeout = outcome.timeout;

        if self.min_distance <= 1 {
            return Err(MinimizerError::AlreadyMinimal.into());
        }

        Ok(())
    }

    fn search(&mut self) -> Result<Termination> {
        loop {
            if !self.set_discard_chance() {
                return Ok(Termination::Exhausted);
            }
            self.set_misses_allowed();

            self.iterations.push(IterationSnapshot {
                min_distance: self.min_distance,
                target_size_guess: self.search.target_size_guess,
            });
            self.search.current_distance = self.min_distance;
            let line = self.progress_line();
            self.progress.line(&line)?;

            let mut got_hit = false;
            while self.search.consecutive_misses <= self.search.misses_allowed {
                if self.deadline.expired() {
                    log::info!("Max time for minimization exceeded, ending minimizer early.");
                    return Ok(Termination::TimedOut);
                }

                if !self.set_discard_chance() {
                    return Ok(Termination::Exhausted);
                }
                self.set_misses_allowed();

                let (candidate, distance) = self.generate();
                self.search.total_tries += 1;
                self.search.current_distance = distance;

                let hash = content_hash(candidate.as_slice());
                let is_repeat = self.seen_before(hash);
                if let Some(reason) = self.exhaustiveness(hash, distance) {
                    return Ok(Termination::Done(reason));
                }
                log::trace!("{}", self.progress_line());

                if is_repeat {
                    // repeats count as a miss: the miss budget assumes draws with replacement
                    self.miss();
                    continue;
                }

                let trial = self.trial(&candidate)?;
                if trial.same_crash {
                    self.accept(candidate, trial.encoded, distance);
                    got_hit = true;

                    if self.min_distance == 1 {
                        return Ok(Termination::Done(DoneReason::SingleByte));
                    }

                    self.search.consecutive_misses = 0;
                    if !self.set_discard_chance() {
                        return Ok(Termination::Exhausted);
                    }
                    self.set_misses_allowed();
                } else {
                    self.miss();

                    if self.too_many_other_crashes && self.config.target.is_seed() {
                        log::info!(
                            "Exceeded maximum number of other crashes ({}), ending minimizer early.",
                            MAX_OTHER_CRASHES
                        );
                        return Ok(Termination::Done(DoneReason::TooManyOtherCrashes));
                    }
                }
            }

            if !got_hit {
                // confident enough that the target size guess is wrong
                self.search.target_size_guess += 1;
            }
        }
    }

    /// `false` when no discard chance is left that could narrow the search
    fn set_discard_chance(&mut self) -> bool {
        let target_size_guess = self.search.target_size_guess as f64;
        let discard_chance = 1.0 / (target_size_guess + 1.0);
        let min_discard_chance = 1.0 - target_size_guess / self.min_distance as f64;

        if discard_chance > min_discard_chance {
            return false;
        }

        if self.search.discard_chance != discard_chance {
            self.search.consecutive_misses = 0;
            self.search.discard_chance = discard_chance;
        }

        true
    }

    fn set_misses_allowed(&mut self) {
        self.search.misses_allowed = miss_budget(
            self.min_distance,
            self.search.target_size_guess,
            1.0 - self.search.discard_chance,
            self.config.confidence,
        );
    }

    /// Candidate strictly closer than the current minimum, but not the target itself.
    fn generate(&self) -> (Vec<u8>, usize) {
        loop {
            let (candidate, distance) = self.config.metric.revert(
                &self.rng,
                &self.target,
                &self.best,
                self.search.discard_chance,
            );

            if 0 < distance && distance < self.min_distance {
                return (candidate, distance);
            }
        }
    }

    fn seen_before(&mut self, hash: u64) -> bool {
        let count = self.files_tried.entry(hash).or_default();
        *count += 1;
        *count > 1
    }

    /// Exhaustiveness bookkeeping at the current minimum, only decided on repeats.
    fn exhaustiveness(&mut self, hash: u64, distance: usize) -> Option<DoneReason> {
        let min = self.min_distance;
        let tried = self.tried_at_distance.entry(min).or_default();
        let single_reductions = self.single_reductions_at_distance.entry(min).or_default();

        let is_new = tried.insert(hash);
        if distance + 1 == min {
            single_reductions.insert(hash);
        }
        if is_new {
            return None;
        }

        if reachable_candidates(min) == Some(tried.len() as u128) {
            log::info!("Exhaustively searched all files shorter than {}", min);
            return Some(DoneReason::SearchedAll);
        }

        if single_reductions.len() == min {
            log::info!(
                "We have tried all {} files that are one byte closer than the current minimum",
                min
            );
            return Some(DoneReason::TriedAllSingleReductions);
        }

        None
    }

    fn miss(&mut self) {
        self.search.consecutive_misses += 1;
        self.search.total_misses += 1;
    }

    fn trial(&mut self, candidate: &[u8]) -> Result<Trial> {
        let encoded = self
            .codec
            .encode(candidate)
            .context("Failed to encode candidate")?
            .into_owned();
        let candidate_path = self.candidate.clone();
        let files = TrialFiles::create(&candidate_path, self.scratch.path(), &encoded)?;

        self.debugger_runs += 1;
        let signature = match run_signature(
            &mut self.debugger,
            files.candidate,
            files.output(),
            self.timeout,
            self.config.backtrace_levels,
        ) {
            Ok((_, signature)) => signature,
            Err(err) => match fatal(err) {
                Some(err) => return Err(err).context("Debugger failed"),
                None => None,
            },
        };

        let signature = match signature {
            Some(signature) => signature,
            None => {
                return Ok(Trial {
                    encoded,
                    same_crash: false,
                })
            }
        };

        let count = self.crash_sigs_found.entry(signature.clone()).or_default();
        *count += 1;
        let first_sighting = *count == 1;

        if first_sighting {
            log::info!("crash={}", signature);

            if self.config.save_others && !self.signatures.contains(&signature) {
                self.record_other_crash(&files, signature.clone(), candidate, &encoded)?;
            }
        }

        Ok(Trial {
            encoded,
            same_crash: self.signatures.contains(&signature),
        })
    }

    /// Re-run a copy of the candidate and keep it when it crashes again.
    fn record_other_crash(
        &mut self,
        files: &TrialFiles,
        signature: CrashSignature,
        candidate: &[u8],
        encoded: &[u8],
    ) -> Result<()> {
        if self.other_crashes.len() >= MAX_OTHER_CRASHES {
            self.too_many_other_crashes = true;
            return Ok(());
        }

        log::debug!("Building new crash object.");
        let dir = tempfile::Builder::new()
            .prefix(OTHER_CRASH_PREFIX)
            .tempdir_in(self.scratch.path())
            .map_err(MinimizerError::Resource)
            .context("Failed to create other crash directory")?;
        let path = dir.path().join(format!(
            "{}-{:08x}{}",
            self.name,
            self.rng.u32(..),
            self.config.extension
        ));
        fs::copy(files.candidate, &path)
            .map_err(MinimizerError::Resource)
            .with_context(|| format!("Failed to copy candidate to {path:?}"))?;
        let output = tempfile::Builder::new()
            .prefix(TRIAL_OUTPUT_PREFIX)
            .tempfile_in(dir.path())
            .map_err(MinimizerError::Resource)
            .context("Failed to create debugger output file")?;

        self.debugger_runs += 1;
        let crash = match self.debugger.run(&path, output.path(), self.timeout) {
            Ok(result) => result.crash,
            Err(err) => match fatal(err) {
                Some(err) => return Err(err).context("Debugger failed"),
                None => false,
            },
        };

        if crash {
            let distance = self.config.metric.distance(&self.target, candidate)?;
            self.other_crashes.insert(
                signature,
                OtherCrash {
                    distance,
                    content: encoded.to_vec(),
                },
            );
        } else {
            log::debug!("other crash {} did not reproduce", signature);
        }

        Ok(())
    }

    fn accept(&mut self, candidate: Vec<u8>, encoded: Vec<u8>, distance: usize) {
        debug_assert!(distance < self.min_distance);

        self.best = candidate;
        self.best_encoded = encoded;
        self.min_distance = distance;
        self.search.hits += 1;
        log::debug!("new minimum distance {}", distance);

        if let Some(output) = &self.config.output {
            common::fs::write_file(output, &self.best_encoded).log_error();
        }
    }

    fn progress_line(&self) -> ProgressLine {
        ProgressLine {
            start: self.start_distance,
            min: self.min_distance,
            target_guess: self.search.target_size_guess,
            curr: self.search.current_distance,
            chance: self.search.discard_chance,
            misses: self.search.consecutive_misses,
            misses_allowed: self.search.misses_allowed,
            total_misses: self.search.total_misses,
            total_tries: self.search.total_tries,
            unique_crashes: self.crash_sigs_found.len(),
        }
    }

    fn signatures_string(&self) -> String {
        self.signatures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn bytemap(&self) -> Vec<usize> {
        differing_positions(&self.target, &self.best).unwrap_or_default()
    }

    fn final_log(&mut self) -> Result<()> {
        let line = self.progress_line();
        self.progress.line(&line)?;

        let message = format!("We were looking for [{}] ...", self.signatures_string());
        self.progress.note(&message)?;

        let found: BTreeMap<_, _> = self.crash_sigs_found.iter().collect();
        for (signature, count) in found {
            let message = format!("\t...and found {signature}\t{count} times");
            self.progress.note(&message)?;
        }

        let message = format!("Bytemap: {:?}", self.bytemap());
        self.progress.note(&message)
    }

    fn report(&self, termination: Termination) -> MinimizationReport {
        MinimizationReport {
            termination,
            target: self.config.target,
            metric: self.config.metric,
            start_distance: self.start_distance,
            min_distance: self.min_distance,
            bytemap: self.bytemap(),
            signatures: self.signatures.clone(),
            crash_sigs_found: self
                .crash_sigs_found
                .iter()
                .map(|(signature, count)| (signature.clone(), *count))
                .collect(),
            other_crashes: self
                .other_crashes
                .iter()
                .map(|(signature, crash)| (signature.clone(), crash.clone()))
                .collect(),
            files_tried: self.files_tried.len(),
            exhaustiveness: self
                .tried_at_distance
                .iter()
                .map(|(distance, tried)| {
                    let single_reductions = self
                        .single_reductions_at_distance
                        .get(distance)
                        .map(FxHashSet::len)
                        .unwrap_or(0);

                    (
                        *distance,
                        LevelTries {
                            tried: tried.len(),
                            single_reductions,
                        },
                    )
                })
                .collect(),
            iterations: self.iterations.clone(),
            total_tries: self.search.total_tries,
            total_misses: self.search.total_misses,
            success_rate: beta_estimate(self.search.hits, self.search.total_tries),
            debugger_runs: self.debugger_runs,
            timeout: self.timeout,
            elapsed: self.deadline.elapsed(),
            archive: self.codec.archive().cloned(),
            content: self.best_encoded.clone(),
            flat: self.best.clone(),
        }
    }
}

/// `2^n - 2` distinct candidates lie strictly between the target and a distance `n` file
fn reachable_candidates(distance: usize) -> Option<u128> {
    u32::try_from(distance)
        .ok()
        .and_then(|shift| 1u128.checked_shl(shift))
        .and_then(|count| count.checked_sub(2))
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use pretty_assertions::assert_eq;
    use zip::CompressionMethod;

    use super::*;
    use crate::{
        content::tests::{build_zip, read_zip},
        debugger::DebugResult,
        error::DebuggerError,
    };

    /// Classifies the candidate file content in-process.
    struct Stub<F> {
        classify: F,
        runs: usize,
    }

    impl<F: FnMut(&[u8]) -> Option<String>> Stub<F> {
        fn new(classify: F) -> Self {
            Self { classify, runs: 0 }
        }
    }

    impl<F: FnMut(&[u8]) -> Option<String>> Debugger for Stub<F> {
        fn run(
            &mut self,
            candidate: &Path,
            _output: &Path,
            _timeout: Duration,
        ) -> Result<DebugResult, DebuggerError> {
            self.runs += 1;
            let content = fs::read(candidate).map_err(DebuggerError::Resource)?;

            Ok(match (self.classify)(&content) {
                Some(frame) => DebugResult::crash([frame]),
                None => DebugResult::no_crash(),
            })
        }
    }

    /// Like `Stub`, but decides the whole debugger result.
    struct Scripted<F>(F);

    impl<F: FnMut(&[u8]) -> Result<DebugResult, DebuggerError>> Debugger for Scripted<F> {
        fn run(
            &mut self,
            candidate: &Path,
            _output: &Path,
            _timeout: Duration,
        ) -> Result<DebugResult, DebuggerError> {
            let content = fs::read(candidate).map_err(DebuggerError::Resource)?;
            (self.0)(&content)
        }
    }

    fn sig(frame: &str) -> CrashSignature {
        DebugResult::crash([frame]).signature(5).unwrap()
    }

    fn zeros_with_ff(range: std::ops::Range<usize>) -> (Vec<u8>, Vec<u8>) {
        let seed = vec![0u8; 100];
        let mut crash = seed.clone();
        crash[range].fill(0xff);
        (seed, crash)
    }

    fn config(target: TargetMode) -> MinimizerConfig {
        let mut config = MinimizerConfig::new(target);
        config.max_time = None;
        config.random_seed = Some(0x5eed);
        config
    }

    fn sig1_if_any_set(content: &[u8]) -> Option<String> {
        content[10..20]
            .iter()
            .any(|byte| *byte != 0)
            .then(|| "SIG1".to_string())
    }

    /// `SIG1` for the unmodified crash, a new signature for every other content.
    fn always_new_signature(original: Vec<u8>) -> impl FnMut(&[u8]) -> Option<String> {
        move |content: &[u8]| {
            Some(if content == original.as_slice() {
                "SIG1".to_string()
            } else {
                format!("other-{}", content_hash(content))
            })
        }
    }

    fn assert_monotonic(report: &MinimizationReport) {
        for pair in report.iterations.windows(2) {
            assert!(pair[1].min_distance <= pair[0].min_distance);
            assert!(pair[1].target_size_guess >= pair[0].target_size_guess);
        }
    }

    #[test]
    fn converges_to_single_byte() {
        let (seed, crash) = zeros_with_ff(10..20);
        let mut engine = MinimizationEngine::new(
            config(TargetMode::Seed),
            Stub::new(sig1_if_any_set),
            Crash::new(crash.clone(), Some(seed)),
        )
        .unwrap();
        assert_eq!(engine.start_distance(), 10);

        let report = engine.run().unwrap();

        assert_eq!(engine.state(), EngineState::Finished);
        assert_eq!(report.termination, Termination::Done(DoneReason::SingleByte));
        assert_eq!(report.start_distance, 10);
        assert_eq!(report.min_distance, 1);
        assert_eq!(report.bytemap.len(), 1);
        assert!((10..20).contains(&report.bytemap[0]));
        assert_eq!(report.content, report.flat);
        assert_eq!(sig1_if_any_set(&report.content), Some("SIG1".into()));
        assert_eq!(report.signatures.len(), 1);
        assert!(report.signatures.contains(&sig("SIG1")));
        assert!(report.other_crashes.is_empty());
        assert!(report.success_rate.p > 0.0 && report.success_rate.p < 1.0);
        assert_monotonic(&report);
    }

    #[test]
    fn bitwise_converges_to_single_bit() {
        let (seed, crash) = zeros_with_ff(10..13);
        let mut config = config(TargetMode::Seed);
        config.metric = Metric::Bitwise;

        let mut engine = MinimizationEngine::new(
            config,
            Stub::new(sig1_if_any_set),
            Crash::new(crash, Some(seed)),
        )
        .unwrap();
        assert_eq!(engine.start_distance(), 24);

        let report = engine.run().unwrap();

        assert_eq!(report.termination, Termination::Done(DoneReason::SingleByte));
        assert_eq!(report.min_distance, 1);
        assert_eq!(
            report
                .flat
                .iter()
                .map(|byte| byte.count_ones())
                .sum::<u32>(),
            1
        );
        assert_monotonic(&report);
    }

    #[test]
    fn never_crashes() {
        let (seed, crash) = zeros_with_ff(10..20);
        let mut stub = Stub::new(|_: &[u8]| None);
        let mut engine = MinimizationEngine::new(
            config(TargetMode::Seed),
            &mut stub,
            Crash::new(crash, Some(seed)),
        )
        .unwrap();

        let err = engine.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MinimizerError>(),
            Some(MinimizerError::NoCrashToMinimize)
        ));
        assert_eq!(engine.state(), EngineState::Sampling);
        drop(engine);
        assert_eq!(stub.runs, 5);
    }

    #[test]
    fn already_minimal() {
        let (seed, crash) = zeros_with_ff(10..11);
        let mut engine = MinimizationEngine::new(
            config(TargetMode::Seed),
            Stub::new(sig1_if_any_set),
            Crash::new(crash, Some(seed)),
        )
        .unwrap();

        let err = engine.run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MinimizerError>(),
            Some(MinimizerError::AlreadyMinimal)
        ));
    }

    #[test]
    fn seed_length_mismatch() {
        let result = MinimizationEngine::new(
            config(TargetMode::Seed),
            Stub::new(sig1_if_any_set),
            Crash::new(vec![0; 10], Some(vec![0; 11])),
        );

        assert!(matches!(
            result.err().and_then(|err| err.downcast::<MinimizerError>().ok()),
            Some(MinimizerError::Configuration(_))
        ));
    }

    #[test]
    fn missing_seed() {
        let result = MinimizationEngine::new(
            config(TargetMode::Seed),
            Stub::new(sig1_if_any_set),
            Crash::new(vec![0; 10], None),
        );

        assert!(result.is_err());
    }

    #[test]
    fn no_reduction_possible() {
        // every differing byte is required for the crash
        let (seed, crash) = zeros_with_ff(10..12);
        let mut engine = MinimizationEngine::new(
            config(TargetMode::Seed),
            Stub::new(|content: &[u8]| {
                (content[10] != 0 && content[11] != 0).then(|| "SIG1".to_string())
            }),
            Crash::new(crash.clone(), Some(seed)),
        )
        .unwrap();

        let report = engine.run().unwrap();

        assert!(matches!(
            report.termination,
            Termination::Exhausted
                | Termination::Done(DoneReason::SearchedAll)
                | Termination::Done(DoneReason::TriedAllSingleReductions)
        ));
        assert_eq!(report.min_distance, 2);
        assert_eq!(report.content, crash);
        assert_eq!(report.bytemap, vec![10, 11]);
        assert!(report.files_tried <= 2);
        assert_monotonic(&report);
    }

    #[test]
    fn timeout_keeps_best_so_far() {
        let (seed, crash) = zeros_with_ff(10..20);
        let mut config = config(TargetMode::Seed);
        config.max_time = Some(Duration::from_nanos(1));

        let mut engine = MinimizationEngine::new(
            config,
            Stub::new(sig1_if_any_set),
            Crash::new(crash.clone(), Some(seed)),
        )
        .unwrap();
        let report = engine.run().unwrap();

        assert_eq!(report.termination, Termination::TimedOut);
        assert_eq!(report.min_distance, 10);
        assert_eq!(report.content, crash);
        assert_eq!(report.total_tries, 0);
    }

    #[test]
    fn zip_member_is_minimized() {
        let mut member = vec![0u8; 32];
        let seed = build_zip(&[
            ("first.txt", b"hello world".as_slice(), CompressionMethod::Stored),
            ("dir/second.bin", member.as_slice(), CompressionMethod::Deflated),
        ]);
        member[4..12].fill(0x41);
        let crash = build_zip(&[
            ("first.txt", b"hello world".as_slice(), CompressionMethod::Stored),
            ("dir/second.bin", member.as_slice(), CompressionMethod::Deflated),
        ]);

        let classify = |content: &[u8]| {
            let members = read_zip(content);
            members[1]
                .1
                .iter()
                .any(|byte| *byte != 0)
                .then(|| "SIG1".to_string())
        };

        let mut engine = MinimizationEngine::new(
            config(TargetMode::Seed),
            Stub::new(classify),
            Crash::new(crash, Some(seed)),
        )
        .unwrap();
        assert_eq!(engine.start_distance(), 8);

        let report = engine.run().unwrap();
        assert_eq!(report.termination, Termination::Done(DoneReason::SingleByte));
        assert!(report.archive.is_some());

        let members = read_zip(&report.content);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].0, "first.txt");
        assert_eq!(members[0].1, b"hello world".to_vec());
        assert_eq!(members[1].0, "dir/second.bin");
        assert_eq!(members[1].2, CompressionMethod::Deflated);
        assert_eq!(members[1].1.iter().filter(|byte| **byte != 0).count(), 1);
        assert!(zip::ZipArchive::new(Cursor::new(&report.content)).is_ok());
    }

    #[test]
    fn string_targets() {
        let crash = b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_vec();
        // crashes while the fifth byte is still an 'A'
        let classify = |content: &[u8]| (content[4] == b'A').then(|| "SIG1".to_string());

        for target in [TargetMode::Char(b'x'), TargetMode::Pattern] {
            let mut config = config(target);
            config.confidence = 0.999;

            let mut engine = MinimizationEngine::new(
                config,
                Stub::new(classify),
                Crash::new(crash.clone(), None),
            )
            .unwrap();
            let target_bytes = engine.target().to_vec();
            let report = engine.run().unwrap();

            assert_eq!(report.min_distance, 1, "{target}");
            assert_eq!(report.bytemap, vec![4]);
            assert_eq!(report.flat[4], b'A');
            assert_eq!(&report.flat[5..], &target_bytes[5..]);
        }
    }

    #[test]
    fn other_crashes_are_recorded() {
        let (seed, crash) = zeros_with_ff(10..20);
        let mut engine = MinimizationEngine::new(
            config(TargetMode::Seed),
            Stub::new(|content: &[u8]| {
                if content[10..20].iter().all(|byte| *byte == 0xff) {
                    Some("SIG1".to_string())
                } else if content[10..20].iter().any(|byte| *byte != 0) {
                    Some(format!("other-{}", content_hash(content)))
                } else {
                    None
                }
            }),
            Crash::new(crash.clone(), Some(seed)),
        )
        .unwrap();
        engine.state = EngineState::Sampling;
        engine.sample().unwrap();

        let mut candidate = crash.clone();
        candidate[10] = 0;
        let trial = engine.trial(&candidate).unwrap();
        assert!(!trial.same_crash);
        assert_eq!(engine.other_crashes.len(), 1);

        let other = engine.other_crashes.values().next().unwrap();
        assert_eq!(other.distance, 9);
        assert_eq!(other.content, candidate);

        // the same signature again is only counted
        engine.trial(&candidate).unwrap();
        assert_eq!(engine.other_crashes.len(), 1);
        assert_eq!(
            engine.crash_sigs_found.values().copied().max(),
            Some(2)
        );

        // trial scratch files are gone
        assert!(!engine.candidate.exists());
        assert_eq!(fs::read_dir(engine.scratch_dir()).unwrap().count(), 0);
    }

    #[test]
    fn too_many_other_crashes() {
        let (seed, crash) = zeros_with_ff(10..20);
        let original = crash.clone();
        let mut engine = MinimizationEngine::new(
            config(TargetMode::Seed),
            Stub::new(move |content: &[u8]| {
                if content == original.as_slice() {
                    Some("SIG1".to_string())
                } else {
                    Some(format!("other-{}", content_hash(content)))
                }
            }),
            Crash::new(crash.clone(), Some(seed)),
        )
        .unwrap();
        engine.state = EngineState::Sampling;
        engine.sample().unwrap();

        for i in 0..=MAX_OTHER_CRASHES {
            let mut candidate = crash.clone();
            candidate[10 + i % 10] = i as u8;
            candidate[0] = (i / 10) as u8 + 1;
            assert!(!engine.trial(&candidate).unwrap().same_crash);
        }

        assert_eq!(engine.other_crashes.len(), MAX_OTHER_CRASHES);
        assert!(engine.too_many_other_crashes);
        assert_eq!(engine.crash_sigs_found.len(), MAX_OTHER_CRASHES + 1);
    }

    #[test]
    fn debugger_errors_are_misses() {
        let errors: [fn() -> DebuggerError; 3] = [
            || DebuggerError::Timeout,
            || DebuggerError::Spawn(io::Error::new(io::ErrorKind::NotFound, "no such program")),
            || DebuggerError::MalformedOutput("no backtrace".into()),
        ];

        for error in errors {
            let (seed, crash) = zeros_with_ff(10..20);
            let original = crash.clone();
            let mut engine = MinimizationEngine::new(
                config(TargetMode::Seed),
                Scripted(move |content: &[u8]| {
                    if content == original.as_slice() {
                        Ok(DebugResult::crash(["SIG1"]))
                    } else {
                        Err(error())
                    }
                }),
                Crash::new(crash.clone(), Some(seed)),
            )
            .unwrap();

            let report = engine.run().unwrap();

            assert!(matches!(
                report.termination,
                Termination::Exhausted
                    | Termination::Done(DoneReason::SearchedAll)
                    | Termination::Done(DoneReason::TriedAllSingleReductions)
            ));
            assert_eq!(engine.state(), EngineState::Finished);
            assert_eq!(report.min_distance, 10);
            assert_eq!(report.content, crash);
            assert!(report.total_tries > 0);
            // every try but an exhaustiveness stop is a miss
            assert!(report.total_tries - report.total_misses <= 1);
            assert!(report.crash_sigs_found.is_empty());
            assert!(report.other_crashes.is_empty());
        }
    }

    #[test]
    fn resource_failure_aborts_run() {
        let (seed, crash) = zeros_with_ff(10..20);
        let original = crash.clone();
        let mut engine = MinimizationEngine::new(
            config(TargetMode::Seed),
            Scripted(move |content: &[u8]| {
                if content == original.as_slice() {
                    Ok(DebugResult::crash(["SIG1"]))
                } else {
                    Err(DebuggerError::Resource(io::Error::new(
                        io::ErrorKind::Other,
                        "disk full",
                    )))
                }
            }),
            Crash::new(crash, Some(seed)),
        )
        .unwrap();

        let err = engine.run().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<MinimizerError>(),
            Some(MinimizerError::Resource(_))
        ));
        assert_eq!(engine.state(), EngineState::Searching);
    }

    #[test]
    fn other_crash_cap_ends_seed_run() {
        let (seed, crash) = zeros_with_ff(10..20);
        let mut engine = MinimizationEngine::new(
            config(TargetMode::Seed),
            Stub::new(always_new_signature(crash.clone())),
            Crash::new(crash.clone(), Some(seed)),
        )
        .unwrap();

        let report = engine.run().unwrap();

        assert_eq!(
            report.termination,
            Termination::Done(DoneReason::TooManyOtherCrashes)
        );
        assert_eq!(report.other_crashes.len(), MAX_OTHER_CRASHES);
        assert_eq!(report.crash_sigs_found.len(), MAX_OTHER_CRASHES + 1);
        assert_eq!(report.min_distance, 10);
        assert_eq!(report.content, crash);
    }

    #[test]
    fn other_crash_cap_keeps_string_run_going() {
        let crash = vec![b'A'; 16];
        let mut config = config(TargetMode::Char(b'x'));
        config.confidence = 0.999;

        let mut engine = MinimizationEngine::new(
            config,
            Stub::new(always_new_signature(crash.clone())),
            Crash::new(crash.clone(), None),
        )
        .unwrap();

        let report = engine.run().unwrap();

        assert!(matches!(
            report.termination,
            Termination::Exhausted
                | Termination::Done(DoneReason::SearchedAll)
                | Termination::Done(DoneReason::TriedAllSingleReductions)
        ));
        assert_eq!(report.other_crashes.len(), MAX_OTHER_CRASHES);
        assert!(report.crash_sigs_found.len() > MAX_OTHER_CRASHES);
        assert_eq!(report.min_distance, 16);
        assert_eq!(report.content, crash);
    }

    #[test]
    fn output_and_progress_log() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("crash-minimized.bin");
        let log = tmp.path().join("minimizer_log.txt");

        let (seed, crash) = zeros_with_ff(10..20);
        let mut config = config(TargetMode::Seed);
        config.output = Some(output.clone());
        config.progress_log = Some(log.clone());
        config.scratch_dir = Some(tmp.path().to_path_buf());
        config.extension = ".bin".into();

        let mut engine = MinimizationEngine::new(
            config,
            Stub::new(sig1_if_any_set),
            Crash::new(crash, Some(seed)),
        )
        .unwrap();
        let scratch = engine.scratch_dir().to_path_buf();
        assert!(scratch.starts_with(tmp.path()));

        let report = engine.run().unwrap();
        drop(engine);

        assert_eq!(fs::read(&output).unwrap(), report.content);
        assert!(!scratch.exists());

        let log = fs::read_to_string(&log).unwrap();
        let first = log.lines().next().unwrap();
        assert!(first.starts_with("start=10 min=10 target_guess=1 "));
        assert!(log.contains("We were looking for ["));
        assert!(log.contains(&format!("Bytemap: {:?}", report.bytemap)));
    }

    #[test]
    fn run_only_once() {
        let (seed, crash) = zeros_with_ff(10..20);
        let mut engine = MinimizationEngine::new(
            config(TargetMode::Seed),
            Stub::new(sig1_if_any_set),
            Crash::new(crash, Some(seed)),
        )
        .unwrap();

        engine.run().unwrap();
        assert!(engine.run().is_err());
    }

    #[test]
    fn reachable_candidate_count() {
        assert_eq!(reachable_candidates(1), Some(0));
        assert_eq!(reachable_candidates(2), Some(2));
        assert_eq!(reachable_candidates(10), Some(1022));
        assert_eq!(reachable_candidates(200), None);
    }
}
