//! Set algebra over series identifiers
//!
//! Identifiers are fixed-width, so byte order is a total order and
//! bisection over a sorted vector is exact.

use crate::identity::SeriesId;

/// Members present in both sets
///
/// Sorts the larger set, probes it with each member of the smaller one and
/// keeps the smaller set's storage for the result.
pub fn intersect(a: Vec<SeriesId>, b: Vec<SeriesId>) -> Vec<SeriesId> {
    let (mut small, mut large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    large.sort_unstable();
    small.sort_unstable();
    small.dedup();
    small.retain(|id| large.binary_search(id).is_ok());
    small
}

/// Members present in either set
///
/// Sorts the larger set and appends the members of the smaller set that it
/// does not already hold.
pub fn union(a: Vec<SeriesId>, b: Vec<SeriesId>) -> Vec<SeriesId> {
    let (mut small, mut large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    large.sort_unstable();
    large.dedup();
    small.sort_unstable();
    small.dedup();
    let missing: Vec<SeriesId> = small
        .into_iter()
        .filter(|id| large.binary_search(id).is_err())
        .collect();
    large.reserve(missing.len());
    large.extend(missing);
    large
}

/// Union of many sets
pub fn union_all(sets: impl IntoIterator<Item = Vec<SeriesId>>) -> Vec<SeriesId> {
    sets.into_iter().fold(Vec::new(), union)
}
