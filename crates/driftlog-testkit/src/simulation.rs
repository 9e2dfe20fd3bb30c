//! In-memory convergence simulation.
//!
//! Runs the reconciliation rounds on two plain id sets, without messages,
//! stores or transports. Each round both sides build a fresh filter of what
//! they hold; `m` then takes every id of `n` its filter misses, and `n` takes
//! every id of `m` (including what `m` just gained) its own filter misses.
//! This isolates the false-positive behavior the real protocol depends on.

use std::collections::HashSet;

use driftlog_core::BloomFilter;
use rand::Rng;

/// Result of one simulated reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Rounds run. Zero when the sets started out equal.
    pub rounds: usize,
    /// Ids copied across, both directions.
    pub transferred: usize,
    /// The sets ended equal.
    pub converged: bool,
}

/// Reconcile `n` and `m` in place at a fixed false-positive rate, stopping
/// once they are equal or after `max_rounds`.
pub fn simulate<R: Rng + ?Sized>(
    n: &mut HashSet<String>,
    m: &mut HashSet<String>,
    fpr: f64,
    max_rounds: usize,
    rng: &mut R,
) -> Outcome {
    let mut rounds = 0;
    let mut transferred = 0;
    while n != m && rounds < max_rounds {
        rounds += 1;
        let filter_n = filter_of(n, fpr, rng);
        let mut filter_m = filter_of(m, fpr, rng);

        let missing_in_m: Vec<String> = n.iter().filter(|id| !filter_m.has(id)).cloned().collect();
        for id in missing_in_m {
            filter_m.add(&id);
            if m.insert(id) {
                transferred += 1;
            }
        }

        let missing_in_n: Vec<String> = m.iter().filter(|id| !filter_n.has(id)).cloned().collect();
        for id in missing_in_n {
            if n.insert(id) {
                transferred += 1;
            }
        }
    }
    Outcome {
        rounds,
        transferred,
        converged: n == m,
    }
}

fn filter_of<R: Rng + ?Sized>(set: &HashSet<String>, fpr: f64, rng: &mut R) -> BloomFilter {
    let mut filter = BloomFilter::with_rng(set.len(), fpr, rng);
    filter.extend(set.iter());
    filter
}
