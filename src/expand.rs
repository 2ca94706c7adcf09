use crate::model::{Sec, TimeRange};

/// Rejected expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatError {
    /// Fewer than one occurrence requested.
    InvalidRepeats(u32),
    /// More occurrences requested than the configured ceiling allows.
    TooManyRepeats { requested: u32, limit: u32 },
    /// A shifted occurrence would leave the accepted timestamp domain.
    OutOfRange { start: Sec, end: Sec },
}

impl std::fmt::Display for RepeatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatError::InvalidRepeats(n) => write!(f, "repeats is less than 1: {n}"),
            RepeatError::TooManyRepeats { requested, limit } => {
                write!(f, "too many repeats: {requested} > {limit}")
            }
            RepeatError::OutOfRange { start, end } => {
                write!(f, "repeated range out of bounds: [{start}, {end})")
            }
        }
    }
}

impl std::error::Error for RepeatError {}

/// Expand a base range into `repeats` weekly occurrences, the i-th shifted by
/// i weeks, in chronological order. Pure and deterministic; the caller books
/// the whole output as one atomic group or not at all.
pub fn expand_weekly(
    base: TimeRange,
    repeats: u32,
    limit: u32,
) -> Result<Vec<TimeRange>, RepeatError> {
    if repeats < 1 {
        return Err(RepeatError::InvalidRepeats(repeats));
    }
    if repeats > limit {
        return Err(RepeatError::TooManyRepeats {
            requested: repeats,
            limit,
        });
    }
    (0..repeats)
        .map(|i| {
            base.shift_weeks(i).map_err(|e| RepeatError::OutOfRange {
                start: e.start,
                end: e.end,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WEEK_SEC;

    fn base() -> TimeRange {
        TimeRange::new(10_000, 11_000).unwrap()
    }

    #[test]
    fn single_occurrence_is_base() {
        let out = expand_weekly(base(), 1, 10).unwrap();
        assert_eq!(out, vec![base()]);
    }

    #[test]
    fn weekly_spacing_and_order() {
        let out = expand_weekly(base(), 4, 10).unwrap();
        assert_eq!(out.len(), 4);
        for (i, r) in out.iter().enumerate() {
            assert_eq!(r.start(), 10_000 + (i as i64) * WEEK_SEC);
            assert_eq!(r.duration_sec(), 1_000);
        }
        for pair in out.windows(2) {
            assert_eq!(pair[1].start() - pair[0].start(), WEEK_SEC);
        }
    }

    #[test]
    fn zero_repeats_rejected() {
        assert_eq!(
            expand_weekly(base(), 0, 10),
            Err(RepeatError::InvalidRepeats(0))
        );
    }

    #[test]
    fn over_limit_rejected() {
        assert_eq!(
            expand_weekly(base(), 11, 10),
            Err(RepeatError::TooManyRepeats {
                requested: 11,
                limit: 10
            })
        );
    }

    #[test]
    fn at_limit_accepted() {
        let out = expand_weekly(base(), 10, 10).unwrap();
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn expansion_past_domain_ceiling_rejected() {
        // A base range that is valid on its own but whose second occurrence
        // would fall past the timestamp ceiling fails cleanly.
        let near_ceiling =
            TimeRange::new(crate::model::MAX_SEC - 2000, crate::model::MAX_SEC - 1000).unwrap();
        assert_eq!(expand_weekly(near_ceiling, 1, 10), Ok(vec![near_ceiling]));
        assert!(matches!(
            expand_weekly(near_ceiling, 2, 10),
            Err(RepeatError::OutOfRange { .. })
        ));
    }

    #[test]
    fn deterministic() {
        assert_eq!(
            expand_weekly(base(), 5, 10).unwrap(),
            expand_weekly(base(), 5, 10).unwrap()
        );
    }
}
