use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::MinimizerError;

/// Hamming distance between equal-length buffers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    #[default]
    Bytewise,
    Bitwise,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bytewise => "bytewise",
            Self::Bitwise => "bitwise",
        })
    }
}

impl FromStr for Metric {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "byte" | "bytewise" => Self::Bytewise,
            "bit" | "bitwise" => Self::Bitwise,
            _ => return Err("Unknown distance metric!"),
        })
    }
}

fn check_len(a: &[u8], b: &[u8]) -> Result<(), MinimizerError> {
    if a.len() != b.len() {
        return Err(MinimizerError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    Ok(())
}

pub fn bytewise_distance(a: &[u8], b: &[u8]) -> Result<usize, MinimizerError> {
    check_len(a, b)?;
    Ok(a.iter().zip(b).filter(|(x, y)| x != y).count())
}

pub fn bitwise_distance(a: &[u8], b: &[u8]) -> Result<usize, MinimizerError> {
    check_len(a, b)?;
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| (x ^ y).count_ones() as usize)
        .sum())
}

/// Ordered indices of differing bytes (the bytemap).
pub fn differing_positions(a: &[u8], b: &[u8]) -> Result<Vec<usize>, MinimizerError> {
    check_len(a, b)?;
    Ok(a.iter()
        .zip(b)
        .enumerate()
        .filter_map(|(idx, (x, y))| (x != y).then_some(idx))
        .collect())
}

impl Metric {
    pub fn distance(&self, a: &[u8], b: &[u8]) -> Result<usize, MinimizerError> {
        match self {
            Self::Bytewise => bytewise_distance(a, b),
            Self::Bitwise => bitwise_distance(a, b),
        }
    }

    /// Revert every position where `current` differs from `target` with `discard_chance`.
    ///
    /// Returns the new buffer and its distance to `target`. For the bitwise metric the
    /// distance is the sum over all touched bytes.
    pub fn revert(
        &self,
        rng: &fastrand::Rng,
        target: &[u8],
        current: &[u8],
        discard_chance: f64,
    ) -> (Vec<u8>, usize) {
        debug_assert_eq!(target.len(), current.len());

        let mut reverted = Vec::with_capacity(current.len());
        let mut distance = 0;

        match self {
            Self::Bytewise => {
                for (&t, &c) in target.iter().zip(current) {
                    if t != c && rng.f64() > discard_chance {
                        reverted.push(c);
                        distance += 1;
                    } else {
                        reverted.push(t);
                    }
                }
            }
            Self::Bitwise => {
                for (&t, &c) in target.iter().zip(current) {
                    if t == c {
                        reverted.push(t);
                        continue;
                    }

                    // set mask bits are taken from the target
                    let mask = (0..8)
                        .filter(|_| rng.f64() <= discard_chance)
                        .fold(0u8, |mask, bit| mask | (1 << bit));
                    let byte = (t & mask) | (c & !mask);

                    distance += (t ^ byte).count_ones() as usize;
                    reverted.push(byte);
                }
            }
        }

        (reverted, distance)
    }
}
