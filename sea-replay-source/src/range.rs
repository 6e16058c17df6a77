//! Arithmetic over sets of half-open byte ranges.
//!
//! A "range list" here is any slice of [`Range`]; it need not be sorted or disjoint.
//! Functions returning a list always return it normalized: sorted by start, with
//! overlapping and adjacent ranges merged, and without empty ranges.

use sea_replay_types::Range;

/// Sorts and merges touching ranges. Empty ranges are dropped.
pub fn union(ranges: &[Range]) -> Vec<Range> {
    let mut sorted: Vec<Range> = ranges.iter().filter(|r| !r.is_empty()).copied().collect();
    sorted.sort_unstable();
    let mut merged: Vec<Range> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if last.touches(&range) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// The portions of `request` not covered by any range in `covered`, sorted by start.
///
/// An empty `covered` returns the whole request. A zero-length request is always covered.
pub fn missing_ranges(request: Range, covered: &[Range]) -> Vec<Range> {
    if request.is_empty() {
        return Vec::new();
    }
    let mut missing = Vec::new();
    let mut pos = request.start;
    for range in union(covered) {
        if range.end <= pos {
            continue;
        }
        if range.start >= request.end {
            break;
        }
        if range.start > pos {
            missing.push(Range::new(pos, range.start));
        }
        pos = pos.max(range.end);
        if pos >= request.end {
            break;
        }
    }
    if pos < request.end {
        missing.push(Range::new(pos, request.end));
    }
    missing
}

/// Whether every byte of `range` is in some range of `covered`.
pub fn is_range_covered_by_ranges(range: Range, covered: &[Range]) -> bool {
    missing_ranges(range, covered).is_empty()
}

/// Whether any range of `a` shares a position with any range of `b`.
pub fn is_overlapping(a: &[Range], b: &[Range]) -> bool {
    let a = union(a);
    let b = union(b);
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].overlaps(&b[j]) {
            return true;
        }
        if a[i].end <= b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    false
}

/// `ranges` with every position in `remove` taken out.
pub fn subtract(ranges: &[Range], remove: &[Range]) -> Vec<Range> {
    let remove = union(remove);
    union(ranges)
        .into_iter()
        .flat_map(|range| missing_ranges(range, &remove))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn r(start: u64, end: u64) -> Range {
        Range::new(start, end)
    }

    #[test]
    fn test_union() {
        assert_eq!(union(&[]), vec![]);
        assert_eq!(
            union(&[r(10, 20), r(0, 5), r(5, 8), r(15, 30), r(40, 40)]),
            vec![r(0, 8), r(10, 30)]
        );
        assert_eq!(union(&[r(0, 100), r(10, 20)]), vec![r(0, 100)]);
    }

    #[test]
    fn test_missing_ranges() {
        assert_eq!(missing_ranges(r(0, 100), &[]), vec![r(0, 100)]);
        assert_eq!(missing_ranges(r(0, 100), &[r(0, 50)]), vec![r(50, 100)]);
        assert_eq!(
            missing_ranges(r(0, 100), &[r(60, 70), r(10, 20)]),
            vec![r(0, 10), r(20, 60), r(70, 100)]
        );
        assert_eq!(missing_ranges(r(20, 30), &[r(0, 100)]), vec![]);
        assert_eq!(missing_ranges(r(20, 30), &[r(0, 10), r(40, 50)]), vec![r(20, 30)]);
        assert_eq!(missing_ranges(r(5, 5), &[]), vec![]);
    }

    #[test]
    fn test_is_range_covered_by_ranges() {
        assert!(is_range_covered_by_ranges(r(0, 10), &[r(0, 5), r(5, 10)]));
        assert!(!is_range_covered_by_ranges(r(0, 10), &[r(0, 5), r(6, 10)]));
        assert!(is_range_covered_by_ranges(r(3, 3), &[]));
    }

    #[test]
    fn test_is_overlapping() {
        assert!(is_overlapping(&[r(0, 10)], &[r(9, 20)]));
        assert!(!is_overlapping(&[r(0, 10)], &[r(10, 20)]));
        assert!(is_overlapping(&[r(0, 1), r(50, 60)], &[r(20, 30), r(55, 56)]));
        assert!(!is_overlapping(&[], &[r(0, 10)]));
    }

    #[test]
    fn test_subtract() {
        assert_eq!(
            subtract(&[r(0, 100)], &[r(10, 20), r(90, 200)]),
            vec![r(0, 10), r(20, 90)]
        );
        assert_eq!(subtract(&[r(0, 10), r(20, 30)], &[]), vec![r(0, 10), r(20, 30)]);
        assert_eq!(subtract(&[r(0, 10)], &[r(0, 10)]), vec![]);
    }
}
