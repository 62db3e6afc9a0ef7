//! Bounded exponential backoff with jitter
//!
//! The delay for attempt `n` is `base_ms * factor^(n-1)`, capped at `max_ms`,
//! then perturbed according to [`Jitter`]. Randomness is injected through
//! [`RandomSource`] so schedules are reproducible in tests.
//!
//! # Example
//!
//! ```rust
//! use actflow_core::backoff::{build_schedule, compute_delay, BackoffOptions, Jitter};
//!
//! let opts = BackoffOptions {
//!     base_ms: 100.0,
//!     jitter: Jitter::None,
//!     ..BackoffOptions::default()
//! };
//!
//! assert_eq!(compute_delay(3, &opts, &|| 0.0).unwrap(), 400);
//! assert_eq!(
//!     build_schedule(5, &opts, &|| 0.0).unwrap(),
//!     vec![100, 200, 400, 800, 1600]
//! );
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, InvalidArgumentCode, Result};

/// Longest schedule [`build_schedule`] will produce
pub const MAX_SCHEDULE_LEN: i64 = 100;

/// Jitter strategy applied to the capped delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    /// Exactly the capped delay
    None,
    /// Uniform in `[0, capped]`
    #[default]
    Full,
    /// Uniform in `[capped/2, capped]`
    Half,
}

impl std::str::FromStr for Jitter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "full" => Ok(Self::Full),
            "half" => Ok(Self::Half),
            other => Err(format!("unknown jitter '{other}' (expected none, full or half)")),
        }
    }
}

/// Backoff parameters shared by every attempt of a retry loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackoffOptions {
    #[serde(default = "default_base_ms")]
    pub base_ms: f64,

    #[serde(default = "default_factor")]
    pub factor: f64,

    #[serde(default = "default_max_ms")]
    pub max_ms: f64,

    #[serde(default)]
    pub jitter: Jitter,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            factor: default_factor(),
            max_ms: default_max_ms(),
            jitter: Jitter::default(),
        }
    }
}

fn default_base_ms() -> f64 {
    200.0
}
fn default_factor() -> f64 {
    2.0
}
fn default_max_ms() -> f64 {
    30_000.0
}

impl BackoffOptions {
    /// Check every parameter precondition
    pub fn validate(&self) -> Result<()> {
        if !self.base_ms.is_finite() || self.base_ms <= 0.0 {
            return Err(Error::invalid_argument(
                InvalidArgumentCode::BackoffInvalidBase,
                format!("baseMs must be a finite number > 0 (got {})", self.base_ms),
            ));
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(Error::invalid_argument(
                InvalidArgumentCode::BackoffInvalidFactor,
                format!("factor must be a finite number >= 1 (got {})", self.factor),
            ));
        }
        if !self.max_ms.is_finite() || self.max_ms <= 0.0 {
            return Err(Error::invalid_argument(
                InvalidArgumentCode::BackoffInvalidMax,
                format!("maxMs must be a finite number > 0 (got {})", self.max_ms),
            ));
        }
        if self.base_ms > self.max_ms {
            return Err(Error::invalid_argument(
                InvalidArgumentCode::BackoffBaseGtMax,
                format!(
                    "baseMs ({}) must not exceed maxMs ({})",
                    self.base_ms, self.max_ms
                ),
            ));
        }
        Ok(())
    }
}

/// Source of uniform random numbers in `[0, 1]`
///
/// Out-of-range and non-finite values are tolerated: the calculator clamps
/// them rather than propagating them.
pub trait RandomSource: Send + Sync {
    fn next_f64(&self) -> f64;
}

impl<F> RandomSource for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn next_f64(&self) -> f64 {
        self()
    }
}

/// Default randomness drawn from the thread-local `rand` generator
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

fn clamp_unit(r: f64) -> f64 {
    if r.is_finite() {
        r.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Delay in milliseconds before retrying after `attempt` (1-indexed)
///
/// # Errors
///
/// `InvalidArgument` with a `BACKOFF_*` code when `attempt` is zero or any
/// option violates its precondition.
pub fn compute_delay(
    attempt: u32,
    options: &BackoffOptions,
    random: &(impl RandomSource + ?Sized),
) -> Result<u64> {
    if attempt < 1 {
        return Err(Error::invalid_argument(
            InvalidArgumentCode::BackoffInvalidAttempt,
            "attempt must be an integer >= 1",
        ));
    }
    options.validate()?;

    let raw = options.base_ms * options.factor.powf(f64::from(attempt - 1));
    let capped = raw.min(options.max_ms);

    let delay = match options.jitter {
        Jitter::None => capped,
        Jitter::Full => capped * clamp_unit(random.next_f64()),
        Jitter::Half => {
            let half = capped / 2.0;
            half + half * clamp_unit(random.next_f64())
        }
    };

    Ok(delay.round() as u64)
}

/// Delays for attempts `1..=count`
///
/// # Errors
///
/// `SCHEDULE_NEGATIVE_COUNT` for a negative count, `SCHEDULE_TOO_LARGE` above
/// [`MAX_SCHEDULE_LEN`], and any error of [`compute_delay`].
pub fn build_schedule(
    count: i64,
    options: &BackoffOptions,
    random: &(impl RandomSource + ?Sized),
) -> Result<Vec<u64>> {
    if count < 0 {
        return Err(Error::invalid_argument(
            InvalidArgumentCode::ScheduleNegativeCount,
            format!("count must be >= 0 (got {count})"),
        ));
    }
    if count > MAX_SCHEDULE_LEN {
        return Err(Error::invalid_argument(
            InvalidArgumentCode::ScheduleTooLarge,
            format!("count must be <= {MAX_SCHEDULE_LEN} (got {count})"),
        ));
    }
    options.validate()?;

    (1..=count as u32)
        .map(|attempt| compute_delay(attempt, options, random))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn opts(base_ms: f64, jitter: Jitter) -> BackoffOptions {
        BackoffOptions {
            base_ms,
            jitter,
            ..BackoffOptions::default()
        }
    }

    fn fixed(r: f64) -> impl Fn() -> f64 + Send + Sync {
        move || r
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let o = opts(200.0, Jitter::None);
        let delays: Vec<u64> = (1..=4)
            .map(|a| compute_delay(a, &o, &fixed(0.0)).unwrap())
            .collect();
        assert_eq!(delays, vec![200, 400, 800, 1600]);
    }

    #[test]
    fn test_full_jitter_scales_by_random() {
        let o = opts(200.0, Jitter::Full);
        assert_eq!(compute_delay(1, &o, &fixed(0.42)).unwrap(), 84);
    }

    #[test]
    fn test_half_jitter_lies_in_upper_half() {
        let o = opts(200.0, Jitter::Half);
        assert_eq!(compute_delay(3, &o, &fixed(0.42)).unwrap(), 568);
        assert_eq!(compute_delay(3, &o, &fixed(0.0)).unwrap(), 400);
        assert_eq!(compute_delay(3, &o, &fixed(1.0)).unwrap(), 800);
    }

    #[test]
    fn test_random_is_clamped() {
        let o = opts(200.0, Jitter::Full);
        assert_eq!(compute_delay(1, &o, &fixed(f64::NAN)).unwrap(), 0);
        assert_eq!(compute_delay(1, &o, &fixed(1.7)).unwrap(), 200);
        assert_eq!(compute_delay(1, &o, &fixed(-3.0)).unwrap(), 0);
    }

    #[test]
    fn test_rounding_of_fractional_delays() {
        let o = BackoffOptions {
            base_ms: 999.0,
            max_ms: 1000.0,
            jitter: Jitter::Full,
            ..BackoffOptions::default()
        };
        assert_eq!(compute_delay(1, &o, &fixed(0.501)).unwrap(), 500);
        let o = BackoffOptions {
            jitter: Jitter::Half,
            ..o
        };
        assert_eq!(compute_delay(1, &o, &fixed(0.501)).unwrap(), 750);

        let o = opts(1.2, Jitter::None);
        assert_eq!(compute_delay(2, &o, &fixed(0.0)).unwrap(), 2);
    }

    #[test]
    fn test_delay_saturates_at_max() {
        let o = BackoffOptions {
            base_ms: 1000.0,
            max_ms: 5000.0,
            jitter: Jitter::None,
            ..BackoffOptions::default()
        };
        assert_eq!(compute_delay(10, &o, &fixed(0.0)).unwrap(), 5000);
        assert_eq!(compute_delay(u32::MAX, &o, &fixed(0.0)).unwrap(), 5000);
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let cases = [
            (
                BackoffOptions {
                    base_ms: 0.0,
                    ..BackoffOptions::default()
                },
                InvalidArgumentCode::BackoffInvalidBase,
            ),
            (
                BackoffOptions {
                    base_ms: f64::INFINITY,
                    ..BackoffOptions::default()
                },
                InvalidArgumentCode::BackoffInvalidBase,
            ),
            (
                BackoffOptions {
                    factor: 0.5,
                    ..BackoffOptions::default()
                },
                InvalidArgumentCode::BackoffInvalidFactor,
            ),
            (
                BackoffOptions {
                    max_ms: -1.0,
                    ..BackoffOptions::default()
                },
                InvalidArgumentCode::BackoffInvalidMax,
            ),
            (
                BackoffOptions {
                    base_ms: 500.0,
                    max_ms: 100.0,
                    ..BackoffOptions::default()
                },
                InvalidArgumentCode::BackoffBaseGtMax,
            ),
        ];
        for (o, code) in cases {
            let err = compute_delay(1, &o, &fixed(0.5)).unwrap_err();
            assert_eq!(err.invalid_argument_code(), Some(code));
        }

        let err = compute_delay(0, &BackoffOptions::default(), &fixed(0.5)).unwrap_err();
        assert_eq!(
            err.invalid_argument_code(),
            Some(InvalidArgumentCode::BackoffInvalidAttempt)
        );
    }

    #[test]
    fn test_schedule_bounds() {
        let o = opts(100.0, Jitter::None);
        assert!(build_schedule(0, &o, &fixed(0.0)).unwrap().is_empty());
        assert_eq!(
            build_schedule(5, &o, &fixed(0.0)).unwrap(),
            vec![100, 200, 400, 800, 1600]
        );
        assert_eq!(build_schedule(100, &o, &fixed(0.0)).unwrap().len(), 100);
        assert_eq!(
            build_schedule(-1, &o, &fixed(0.0))
                .unwrap_err()
                .invalid_argument_code(),
            Some(InvalidArgumentCode::ScheduleNegativeCount)
        );
        assert_eq!(
            build_schedule(101, &o, &fixed(0.0))
                .unwrap_err()
                .invalid_argument_code(),
            Some(InvalidArgumentCode::ScheduleTooLarge)
        );
    }

    #[test]
    fn test_thread_random_is_in_unit_range() {
        let o = opts(1000.0, Jitter::Full);
        for attempt in 1..=20 {
            let d = compute_delay(attempt, &o, &ThreadRandom).unwrap();
            assert!(d <= 30_000);
        }
    }

    #[test]
    fn test_jitter_from_str() {
        assert_eq!("HALF".parse::<Jitter>(), Ok(Jitter::Half));
        assert!("sometimes".parse::<Jitter>().is_err());
    }

    fn valid_options() -> impl Strategy<Value = (f64, f64, f64)> {
        (1.0f64..5_000.0, 1.0f64..4.0, 0.0f64..100_000.0)
            .prop_map(|(base, factor, extra)| (base, factor, base + extra))
    }

    proptest! {
        #[test]
        fn prop_no_jitter_is_monotonic_and_capped(
            (base_ms, factor, max_ms) in valid_options(),
            attempt in 1u32..60,
        ) {
            let o = BackoffOptions { base_ms, factor, max_ms, jitter: Jitter::None };
            let here = compute_delay(attempt, &o, &fixed(0.0)).unwrap();
            let next = compute_delay(attempt + 1, &o, &fixed(0.0)).unwrap();
            prop_assert!(here <= next);
            prop_assert!(here as f64 <= max_ms.round());
        }

        #[test]
        fn prop_jitter_stays_in_band(
            (base_ms, factor, max_ms) in valid_options(),
            attempt in 1u32..30,
            r in -2.0f64..3.0,
        ) {
            let none = BackoffOptions { base_ms, factor, max_ms, jitter: Jitter::None };
            let capped = compute_delay(attempt, &none, &fixed(0.0)).unwrap();

            let full = compute_delay(attempt, &BackoffOptions { jitter: Jitter::Full, ..none }, &fixed(r)).unwrap();
            prop_assert!(full <= capped);

            let half = compute_delay(attempt, &BackoffOptions { jitter: Jitter::Half, ..none }, &fixed(r)).unwrap();
            prop_assert!(half <= capped);
            prop_assert!(half + 1 >= capped / 2);
        }

        #[test]
        fn prop_schedule_matches_compute_delay(
            count in 0i64..=100,
            base_ms in 1.0f64..1_000.0,
        ) {
            let o = BackoffOptions { base_ms, jitter: Jitter::None, ..BackoffOptions::default() };
            let schedule = build_schedule(count, &o, &fixed(0.0)).unwrap();
            prop_assert_eq!(schedule.len() as i64, count);
            for (i, d) in schedule.iter().enumerate() {
                prop_assert_eq!(*d, compute_delay(i as u32 + 1, &o, &fixed(0.0)).unwrap());
            }
        }
    }
}
