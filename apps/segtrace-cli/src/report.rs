//! Output formatting and reference verification.

use std::collections::BTreeSet;
use std::fmt;

use segtrace_core::HitRecord;
use segtrace_rt::QueryOutcome;

/// One output line per hit.
pub fn format_hit(index: usize, hit: &HitRecord) -> String {
    format!(
        "hit[{index}] queryEid={} baseEid={} P=({},{})",
        hit.query_index, hit.base_index, hit.hit_x, hit.hit_y
    )
}

/// Device results and the CPU reference disagree.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Mismatch {
    /// Pairs the reference found but the device did not return.
    pub missing: Vec<(u32, u32)>,
    /// Pairs the device returned that the reference does not contain.
    pub unexpected: Vec<(u32, u32)>,
    /// Pairs the device returned more than once.
    pub duplicated: Vec<(u32, u32)>,
    /// Device counter and reference hit count, when they differ.
    pub count: Option<(u32, usize)>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "missing {:?}, unexpected {:?}, duplicated {:?}",
            self.missing, self.unexpected, self.duplicated
        )?;
        if let Some((reported, expected)) = self.count {
            write!(f, ", counter {reported} but reference found {expected}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Mismatch {}

/// Compare the device results with the reference hits.
///
/// The counter must always equal the reference count. When the results overflowed
/// only the returned subset is checked pair by pair.
pub fn verify(outcome: &QueryOutcome, reference: &[HitRecord]) -> Result<(), Mismatch> {
    let expected: BTreeSet<(u32, u32)> = reference.iter().map(HitRecord::pair).collect();

    let mut seen = BTreeSet::new();
    let mut mismatch = Mismatch::default();
    for pair in outcome.hits.iter().map(HitRecord::pair) {
        if !seen.insert(pair) {
            mismatch.duplicated.push(pair);
        } else if !expected.contains(&pair) {
            mismatch.unexpected.push(pair);
        }
    }

    if !outcome.overflowed() {
        mismatch.missing = expected.difference(&seen).copied().collect();
    }
    if usize::try_from(outcome.reported_count) != Ok(expected.len()) {
        mismatch.count = Some((outcome.reported_count, expected.len()));
    }

    if mismatch == Mismatch::default() {
        Ok(())
    } else {
        Err(mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(query_index: u32, base_index: u32) -> HitRecord {
        HitRecord {
            query_index,
            base_index,
            hit_x: 0.5,
            hit_y: -0.25,
        }
    }

    fn outcome(hits: Vec<HitRecord>, reported_count: u32, capacity: u32) -> QueryOutcome {
        QueryOutcome {
            hits,
            reported_count,
            capacity,
        }
    }

    #[test]
    fn hit_line() {
        assert_eq!(
            format_hit(3, &hit(1, 2)),
            "hit[3] queryEid=1 baseEid=2 P=(0.5,-0.25)"
        );
    }

    #[test]
    fn matching_sets_pass() {
        let reference = vec![hit(0, 0), hit(0, 1), hit(1, 1)];
        let result = outcome(vec![hit(1, 1), hit(0, 0), hit(0, 1)], 3, 16);
        assert_eq!(verify(&result, &reference), Ok(()));
    }

    #[test]
    fn reports_missing_and_unexpected() {
        let reference = vec![hit(0, 0), hit(0, 1)];
        let result = outcome(vec![hit(0, 0), hit(2, 2)], 2, 16);

        let mismatch = verify(&result, &reference).unwrap_err();
        assert_eq!(mismatch.missing, vec![(0, 1)]);
        assert_eq!(mismatch.unexpected, vec![(2, 2)]);
        assert!(mismatch.duplicated.is_empty());
    }

    #[test]
    fn reports_duplicates() {
        let reference = vec![hit(0, 0)];
        let result = outcome(vec![hit(0, 0), hit(0, 0)], 2, 16);
        assert_eq!(verify(&result, &reference).unwrap_err().duplicated, vec![(0, 0)]);
    }

    #[test]
    fn overflow_checks_returned_subset_only() {
        let reference = vec![hit(0, 0), hit(0, 1), hit(1, 0), hit(1, 1)];
        let result = outcome(vec![hit(1, 0), hit(0, 1)], 4, 2);
        assert_eq!(verify(&result, &reference), Ok(()));
    }

    #[test]
    fn counter_must_match_reference() {
        let reference = vec![hit(0, 0), hit(1, 0)];

        let inflated = outcome(vec![hit(0, 0), hit(1, 0)], 5, 16);
        let mismatch = verify(&inflated, &reference).unwrap_err();
        assert_eq!(mismatch.count, Some((5, 2)));
        assert!(mismatch.missing.is_empty());
        assert!(mismatch.unexpected.is_empty());

        let overflowed = outcome(vec![hit(1, 0)], 900, 1);
        let mismatch = verify(&overflowed, &reference).unwrap_err();
        assert_eq!(mismatch.count, Some((900, 2)));
        assert!(mismatch.missing.is_empty());
        assert!(mismatch.to_string().contains("counter 900 but reference found 2"));
    }
}
