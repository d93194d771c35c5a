//! Brute-force descriptor matching.
//!
//! Float descriptors are compared by Euclidean distance, binary descriptors by
//! Hamming distance. Every scan visits train descriptors in index order and
//! only replaces a candidate on a strictly smaller distance, so ties resolve
//! to the lowest index and results are deterministic.

use coreg_core::{BinaryDescriptor, CoregError, CoregResult, Descriptors, FloatDescriptor, KnnMatch, Match};

/// Raw matcher output, before any filtering
#[derive(Debug, Clone, PartialEq)]
pub enum Matches {
    /// Cross-checked one-to-one nearest neighbours
    Mutual(Vec<Match>),
    /// Two nearest neighbours per query, for the ratio test
    Knn(Vec<KnnMatch>),
}

impl Matches {
    pub fn len(&self) -> usize {
        match self {
            Matches::Mutual(m) => m.len(),
            Matches::Knn(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[inline]
pub fn hamming_distance(a: &BinaryDescriptor, b: &BinaryDescriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

#[inline]
pub fn euclidean_distance(a: &FloatDescriptor, b: &FloatDescriptor) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Match `query` against `train`.
///
/// With `use_ratio_test` the two nearest train descriptors of every query are
/// returned, otherwise only cross-checked nearest neighbours.
pub fn match_descriptors(query: &Descriptors, train: &Descriptors, use_ratio_test: bool) -> CoregResult<Matches> {
    let matches = if use_ratio_test {
        Matches::Knn(knn2_matches(query, train)?)
    } else {
        Matches::Mutual(mutual_matches(query, train)?)
    };
    log::debug!(
        "matched {} query against {} train descriptors: {} {}",
        query.len(),
        train.len(),
        matches.len(),
        if use_ratio_test { "knn pairs" } else { "mutual matches" }
    );
    Ok(matches)
}

/// Pairs `(i, j)` where `j` is the nearest train descriptor of query `i` and
/// `i` the nearest query descriptor of train `j`. Ordered by query index.
///
/// Empty inputs give no matches rather than an error.
pub fn mutual_matches(query: &Descriptors, train: &Descriptors) -> CoregResult<Vec<Match>> {
    match (query, train) {
        (Descriptors::Float(q), Descriptors::Float(t)) => Ok(cross_check(q, t, euclidean_distance)),
        (Descriptors::Binary(q), Descriptors::Binary(t)) => {
            Ok(cross_check(q, t, |a, b| hamming_distance(a, b) as f32))
        }
        _ => Err(kind_mismatch(query, train)),
    }
}

/// The two nearest train descriptors of every query, best first.
///
/// Fails with `InsufficientDescriptors` when either side has fewer than two.
pub fn knn2_matches(query: &Descriptors, train: &Descriptors) -> CoregResult<Vec<KnnMatch>> {
    let found = query.len().min(train.len());
    match (query, train) {
        (Descriptors::Float(q), Descriptors::Float(t)) => {
            require_pairs(found)?;
            Ok(two_nearest(q, t, euclidean_distance))
        }
        (Descriptors::Binary(q), Descriptors::Binary(t)) => {
            require_pairs(found)?;
            Ok(two_nearest(q, t, |a, b| hamming_distance(a, b) as f32))
        }
        _ => Err(kind_mismatch(query, train)),
    }
}

fn require_pairs(found: usize) -> CoregResult<()> {
    if found < 2 {
        return Err(CoregError::InsufficientDescriptors { found, required: 2 });
    }
    Ok(())
}

fn kind_mismatch(query: &Descriptors, train: &Descriptors) -> CoregError {
    CoregError::DescriptorKindMismatch {
        query: query.kind(),
        train: train.kind(),
    }
}

/// Single pass over all pairs, tracking the best partner in both directions
fn cross_check<D>(query: &[D], train: &[D], dist: impl Fn(&D, &D) -> f32) -> Vec<Match> {
    let mut row_best = vec![(usize::MAX, f32::INFINITY); query.len()];
    let mut col_best = vec![(usize::MAX, f32::INFINITY); train.len()];

    for (i, q) in query.iter().enumerate() {
        for (j, t) in train.iter().enumerate() {
            let d = dist(q, t);
            if d < row_best[i].1 {
                row_best[i] = (j, d);
            }
            if d < col_best[j].1 {
                col_best[j] = (i, d);
            }
        }
    }

    row_best
        .iter()
        .enumerate()
        .filter(|&(i, &(j, _))| j != usize::MAX && col_best[j].0 == i)
        .map(|(i, &(j, d))| Match::new(i, j, d))
        .collect()
}

fn two_nearest<D>(query: &[D], train: &[D], dist: impl Fn(&D, &D) -> f32) -> Vec<KnnMatch> {
    query
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let mut best = (0usize, f32::INFINITY);
            let mut second = (0usize, f32::INFINITY);
            for (j, t) in train.iter().enumerate() {
                let d = dist(q, t);
                if d < best.1 {
                    second = best;
                    best = (j, d);
                } else if d < second.1 {
                    second = (j, d);
                }
            }
            KnnMatch {
                best: Match::new(i, best.0, best.1),
                second: Match::new(i, second.0, second.1),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_desc(values: &[f32]) -> FloatDescriptor {
        let mut d = [0.0; 128];
        d[..values.len()].copy_from_slice(values);
        d
    }

    fn binary_desc(ones: usize) -> BinaryDescriptor {
        let mut d = [0u8; 32];
        for bit in 0..ones {
            d[bit / 8] |= 1 << (bit % 8);
        }
        d
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(&binary_desc(0), &binary_desc(0)), 0);
        assert_eq!(hamming_distance(&binary_desc(0), &binary_desc(256)), 256);
        assert_eq!(hamming_distance(&binary_desc(10), &binary_desc(3)), 7);
    }

    #[test]
    fn test_euclidean_distance() {
        let d = euclidean_distance(&float_desc(&[3.0, 0.0]), &float_desc(&[0.0, 4.0]));
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_mutual_matches_are_one_to_one() {
        let query = Descriptors::Float(vec![float_desc(&[0.0]), float_desc(&[10.0]), float_desc(&[10.5])]);
        let train = Descriptors::Float(vec![float_desc(&[10.2]), float_desc(&[0.1])]);
        let matches = mutual_matches(&query, &train).unwrap();
        // Query 1 and 2 both prefer train 0, which prefers query 1 (0.2 < 0.3)
        assert_eq!(matches.len(), 2);
        assert_eq!((matches[0].query_idx, matches[0].train_idx), (0, 1));
        assert_eq!((matches[1].query_idx, matches[1].train_idx), (1, 0));

        let mut trains: Vec<usize> = matches.iter().map(|m| m.train_idx).collect();
        trains.dedup();
        assert_eq!(trains.len(), matches.len());
    }

    #[test]
    fn test_mutual_ties_pick_lowest_index() {
        let query = Descriptors::Binary(vec![binary_desc(4)]);
        let train = Descriptors::Binary(vec![binary_desc(4), binary_desc(4)]);
        let matches = mutual_matches(&query, &train).unwrap();
        assert_eq!(matches, vec![Match::new(0, 0, 0.0)]);
    }

    #[test]
    fn test_mutual_empty_side_gives_no_matches() {
        let query = Descriptors::Binary(vec![]);
        let train = Descriptors::Binary(vec![binary_desc(1)]);
        assert!(mutual_matches(&query, &train).unwrap().is_empty());
        assert!(mutual_matches(&train, &query).unwrap().is_empty());
    }

    #[test]
    fn test_knn2_best_then_second() {
        let query = Descriptors::Binary(vec![binary_desc(5), binary_desc(100)]);
        let train = Descriptors::Binary(vec![binary_desc(90), binary_desc(7), binary_desc(5)]);
        let knn = knn2_matches(&query, &train).unwrap();
        assert_eq!(knn.len(), 2);
        assert_eq!((knn[0].best.train_idx, knn[0].best.distance), (2, 0.0));
        assert_eq!((knn[0].second.train_idx, knn[0].second.distance), (1, 2.0));
        assert_eq!(knn[1].best.train_idx, 0);
        assert!(knn.iter().all(|k| k.best.distance <= k.second.distance));
    }

    #[test]
    fn test_knn2_needs_two_descriptors_each() {
        let one = Descriptors::Float(vec![float_desc(&[1.0])]);
        let many = Descriptors::Float(vec![float_desc(&[1.0]); 5]);
        assert!(matches!(
            match_descriptors(&one, &one, true),
            Err(CoregError::InsufficientDescriptors { found: 1, required: 2 })
        ));
        assert!(matches!(
            knn2_matches(&many, &one),
            Err(CoregError::InsufficientDescriptors { found: 1, .. })
        ));
        // Mutual matching has no such floor
        assert_eq!(match_descriptors(&one, &one, false).unwrap().len(), 1);
    }

    #[test]
    fn test_kind_mismatch() {
        let f = Descriptors::Float(vec![float_desc(&[1.0]); 3]);
        let b = Descriptors::Binary(vec![binary_desc(1); 3]);
        for ratio in [false, true] {
            assert!(matches!(
                match_descriptors(&f, &b, ratio),
                Err(CoregError::DescriptorKindMismatch { .. })
            ));
        }
    }
}
