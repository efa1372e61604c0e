use std::{
    collections::BTreeSet,
    path::Path,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use average::{Estimate, Variance};
use common::config::{
    debugger::{DEEP_BACKTRACE_FACTOR, MIN_DEBUGGER_TIMEOUT},
    minimizer::{
        SAMPLER_CONFIDENCE, SAMPLER_HIT_PROBABILITY, SAMPLER_OUTPUT_PREFIX, TIMEOUT_ZSCORE,
    },
};

use crate::{
    debugger::{CrashSignature, DebugResult, Debugger},
    error::{DebuggerError, MinimizerError},
    probability::misses_until_quit,
};

/// Signatures considered "the same bug".
pub type CrashSignatureSet = BTreeSet<CrashSignature>;

/// Run the debugger and resolve the crash signature, `Ok(None)` when the run did not crash.
///
/// On total stack corruption the deep backtrace analyzer replaces the signature when it
/// yields one.
pub(crate) fn run_signature<D: Debugger + ?Sized>(
    debugger: &mut D,
    candidate: &Path,
    output: &Path,
    timeout: Duration,
    depth: usize,
) -> Result<(DebugResult, Option<CrashSignature>), DebuggerError> {
    let result = debugger.run(candidate, output, timeout)?;
    let mut signature = result.signature(depth);

    if result.crash && result.total_stack_corruption {
        log::debug!("total stack corruption, trying deep backtrace");
        match debugger.deep_backtrace(candidate, output, timeout) {
            Ok(Some(deep)) => {
                if let Some(deep) = deep.signature(depth * DEEP_BACKTRACE_FACTOR) {
                    signature = Some(deep);
                }
            }
            Ok(None) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => log::warn!("Unexpected deep backtrace failure: {}. Continuing", err),
        }
    }

    Ok((result, signature))
}

/// Map a debugger error to a fatal minimizer error, `None` when it only counts as a miss.
pub(crate) fn fatal(err: DebuggerError) -> Option<MinimizerError> {
    match err {
        DebuggerError::Resource(err) => Some(MinimizerError::Resource(err)),
        err => {
            log::debug!("debugger run failed: {}", err);
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplerOutcome {
    pub signatures: CrashSignatureSet,
    /// calibrated debugger timeout
    pub timeout: Duration,
    pub runs: usize,
    pub crashing_runs: usize,
}

/// Re-runs the unmodified crash until no new signature is likely to show up.
pub struct SignatureSampler<'a, D: ?Sized> {
    debugger: &'a mut D,
    scratch: &'a Path,
    depth: usize,
    default_timeout: Duration,
}

impl<'a, D: Debugger + ?Sized> SignatureSampler<'a, D> {
    pub fn new(
        debugger: &'a mut D,
        scratch: &'a Path,
        depth: usize,
        default_timeout: Duration,
    ) -> Self {
        Self {
            debugger,
            scratch,
            depth,
            default_timeout,
        }
    }

    pub fn sample(&mut self, candidate: &Path) -> Result<SamplerOutcome> {
        let max_misses = misses_until_quit(SAMPLER_CONFIDENCE, SAMPLER_HIT_PROBABILITY);
        let mut signatures = CrashSignatureSet::new();
        let mut durations = Variance::new();
        let mut misses = 0;
        let mut runs = 0;

        while misses < max_misses {
            // fresh output file per run, removed on drop
            let output = tempfile::Builder::new()
                .prefix(SAMPLER_OUTPUT_PREFIX)
                .tempfile_in(self.scratch)
                .map_err(MinimizerError::Resource)
                .context("Failed to create sampler output file")?;

            let start = Instant::now();
            let run = run_signature(
                &mut *self.debugger,
                candidate,
                output.path(),
                self.default_timeout,
                self.depth,
            );
            let elapsed = start.elapsed();
            runs += 1;

            let signature = match run {
                Ok((result, signature)) => {
                    if result.crash {
                        durations.add(elapsed.as_secs_f64());
                    }
                    signature
                }
                Err(err) => match fatal(err) {
                    Some(err) => return Err(err).context("Sampling crash signatures failed"),
                    None => None,
                },
            };

            match signature {
                Some(signature) if !signatures.contains(&signature) => {
                    log::debug!("sampled new crash signature {}", signature);
                    signatures.insert(signature);
                    misses = 0;
                }
                _ => misses += 1,
            }
        }

        if signatures.is_empty() {
            return Err(MinimizerError::NoCrashToMinimize.into());
        }

        let crashing_runs = durations.len() as usize;
        let timeout = calibrate_timeout(&durations, self.default_timeout);
        log::info!(
            "Sampled {} crash signature(s) in {} runs, debugger timeout {:?}",
            signatures.len(),
            runs,
            timeout
        );

        Ok(SamplerOutcome {
            signatures,
            timeout,
            runs,
            crashing_runs,
        })
    }
}

/// mean + z * stddev of the crashing runs, within `MIN_DEBUGGER_TIMEOUT..=default`
fn calibrate_timeout(durations: &Variance, default: Duration) -> Duration {
    if durations.is_empty() {
        return default;
    }

    let secs = durations.mean() + TIMEOUT_ZSCORE * durations.population_variance().sqrt();
    if !secs.is_finite() || secs <= 0.0 {
        return default;
    }

    Duration::from_secs_f64(secs)
        .max(MIN_DEBUGGER_TIMEOUT)
        .min(default)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Replays a fixed sequence of results, then repeats the last one.
    struct Replay {
        results: Vec<Option<&'static str>>,
        runs: usize,
    }

    impl Debugger for Replay {
        fn run(
            &mut self,
            _candidate: &Path,
            output: &Path,
            _timeout: Duration,
        ) -> Result<DebugResult, DebuggerError> {
            assert!(output.exists());
            let idx = self.runs.min(self.results.len() - 1);
            self.runs += 1;

            Ok(match self.results[idx] {
                Some(frame) => DebugResult::crash([frame]),
                None => DebugResult::no_crash(),
            })
        }
    }

    struct Corrupted;

    impl Debugger for Corrupted {
        fn run(&mut self, _: &Path, _: &Path, _: Duration) -> Result<DebugResult, DebuggerError> {
            Ok(DebugResult {
                crash: true,
                total_stack_corruption: true,
                exit: Some("signal 11".into()),
                ..DebugResult::default()
            })
        }

        fn deep_backtrace(
            &mut self,
            _: &Path,
            _: &Path,
            _: Duration,
        ) -> Result<Option<DebugResult>, DebuggerError> {
            Ok(Some(DebugResult::crash(["deep"])))
        }
    }

    fn sample<D: Debugger>(debugger: &mut D) -> Result<SamplerOutcome> {
        let tmp = tempfile::tempdir().unwrap();
        let candidate = tmp.path().join("candidate");
        std::fs::write(&candidate, b"crash").unwrap();

        SignatureSampler::new(debugger, tmp.path(), 5, Duration::from_secs(10)).sample(&candidate)
    }

    #[test]
    fn stable_crash() {
        let mut debugger = Replay {
            results: vec![Some("SIG1")],
            runs: 0,
        };
        let outcome = sample(&mut debugger).unwrap();

        assert_eq!(outcome.signatures.len(), 1);
        assert_eq!(outcome.runs, 6);
        assert_eq!(outcome.crashing_runs, 6);
        assert!(outcome.timeout <= Duration::from_secs(10));
    }

    #[test]
    fn new_signature_resets_misses() {
        let mut debugger = Replay {
            results: vec![Some("a"), None, Some("a"), None, Some("b"), Some("a")],
            runs: 0,
        };
        let outcome = sample(&mut debugger).unwrap();

        let expected: CrashSignatureSet = [
            DebugResult::crash(["a"]).signature(5).unwrap(),
            DebugResult::crash(["b"]).signature(5).unwrap(),
        ]
        .into_iter()
        .collect();
        assert_eq!(outcome.signatures, expected);
        // "b" is found in run 5, followed by 5 misses
        assert_eq!(outcome.runs, 10);
    }

    #[test]
    fn never_crashes() {
        let mut debugger = Replay {
            results: vec![None],
            runs: 0,
        };
        let err = sample(&mut debugger).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<MinimizerError>(),
            Some(MinimizerError::NoCrashToMinimize)
        ));
        assert_eq!(debugger.runs, 5);
    }

    #[test]
    fn deep_backtrace_replaces_signature() {
        let outcome = sample(&mut Corrupted).unwrap();

        assert_eq!(
            outcome.signatures.into_iter().collect::<Vec<_>>(),
            vec![DebugResult::crash(["deep"]).signature(50).unwrap()]
        );
    }

    #[test]
    fn timeout_calibration() {
        let default = Duration::from_secs(10);
        assert_eq!(calibrate_timeout(&Variance::new(), default), default);

        let durations: Variance = [1.0, 1.0, 1.0].into_iter().collect();
        assert_eq!(calibrate_timeout(&durations, default), Duration::from_secs(1));

        let durations: Variance = [1.0, 3.0].into_iter().collect();
        let expected = 2.0 + TIMEOUT_ZSCORE * 1.0;
        assert_eq!(
            calibrate_timeout(&durations, default),
            Duration::from_secs_f64(expected)
        );

        let durations: Variance = [20.0, 30.0].into_iter().collect();
        assert_eq!(calibrate_timeout(&durations, default), default);

        let durations: Variance = [0.001, 0.001].into_iter().collect();
        assert_eq!(calibrate_timeout(&durations, default), MIN_DEBUGGER_TIMEOUT);
    }
}
