use std::fmt;

use common::config::{
    minimizer::{DEFAULT_CONFIDENCE_SEED, DEFAULT_CONFIDENCE_STRING},
    target::{PATTERN_DIGITS, PATTERN_LOWER, PATTERN_PERIOD, PATTERN_UPPER},
};
use serde::{Deserialize, Serialize};

use crate::error::MinimizerError;

/// Reference buffer the minimization approaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetMode {
    /// minimize towards the original seed file
    Seed,
    /// minimize towards a string of one repeated character
    Char(u8),
    /// minimize towards the non-repeating "Aa0Aa1..." pattern
    Pattern,
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seed => write!(f, "seed"),
            Self::Char(c) => write!(f, "string of {:?}", *c as char),
            Self::Pattern => write!(f, "pattern"),
        }
    }
}

impl TargetMode {
    pub fn is_seed(&self) -> bool {
        matches!(self, Self::Seed)
    }

    pub fn default_confidence(&self) -> f64 {
        match self {
            Self::Seed => DEFAULT_CONFIDENCE_SEED,
            Self::Char(_) | Self::Pattern => DEFAULT_CONFIDENCE_STRING,
        }
    }

    /// suffix appended to the crashing file name for the minimized file
    pub fn output_suffix(&self) -> String {
        match self {
            Self::Seed => "-minimized".into(),
            Self::Char(c) => format!("-min-{}", *c as char),
            Self::Pattern => "-min-mtsp".into(),
        }
    }

    pub fn log_file_name(&self) -> String {
        match self {
            Self::Seed => "minimizer_log.txt".into(),
            Self::Char(c) => format!("minimizer_{}_log.txt", *c as char),
            Self::Pattern => "minimizer_mtsp_log.txt".into(),
        }
    }

    /// Build a target of `len` bytes, `seed` is the (decoded) seed content.
    pub fn build(&self, seed: Option<&[u8]>, len: usize) -> Result<Vec<u8>, MinimizerError> {
        match self {
            Self::Seed => {
                let seed = seed.ok_or_else(|| {
                    MinimizerError::Configuration("seed required to minimize towards seed".into())
                })?;

                // none of this works if the files are of different size
                if seed.len() != len {
                    return Err(MinimizerError::Configuration(format!(
                        "seed and crash must have the same length: {} != {}",
                        seed.len(),
                        len
                    )));
                }

                Ok(seed.to_vec())
            }
            Self::Char(c) => Ok(vec![*c; len]),
            Self::Pattern => Ok(pattern(len)),
        }
    }
}

/// "Aa0Aa1...Zz9", repeated as often as needed and cut to `len`
pub fn pattern(len: usize) -> Vec<u8> {
    let period = PATTERN_UPPER.iter().flat_map(|&upper| {
        PATTERN_LOWER.iter().flat_map(move |&lower| {
            PATTERN_DIGITS
                .iter()
                .flat_map(move |&digit| [upper, lower, digit])
        })
    });
    debug_assert_eq!(period.clone().count(), PATTERN_PERIOD);

    period.cycle().take(len).collect()
}
