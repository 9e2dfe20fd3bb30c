//! Named reconciliation scenarios with known outcomes.
//!
//! Each scenario describes two id sets by size and overlap plus the filter
//! accuracy to reconcile them at. The simulation tests and any external
//! implementation of the protocol can check themselves against the same list.

use std::collections::HashSet;

use driftlog_sync::expected_cycles;
use rand::Rng;

use crate::fixtures::random_ids;

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    /// Ids only the first side holds.
    pub only_n: usize,
    /// Ids only the second side holds.
    pub only_m: usize,
    /// Ids both sides hold.
    pub shared: usize,
    pub fpr: f64,
}

impl Scenario {
    pub fn size_n(&self) -> usize {
        self.shared + self.only_n
    }

    pub fn size_m(&self) -> usize {
        self.shared + self.only_m
    }

    /// Rounds the filter accuracy is expected to need.
    pub fn expected_rounds(&self) -> usize {
        expected_cycles(self.fpr, self.size_n().max(self.size_m()))
    }

    /// Fresh random sets with this scenario's shape.
    pub fn sets<R: Rng + ?Sized>(&self, rng: &mut R) -> (HashSet<String>, HashSet<String>) {
        let all: Vec<String> = random_ids(rng, self.shared + self.only_n + self.only_m)
            .into_iter()
            .collect();
        let (shared, rest) = all.split_at(self.shared);
        let (only_n, only_m) = rest.split_at(self.only_n);

        let n = shared.iter().chain(only_n).cloned().collect();
        let m = shared.iter().chain(only_m).cloned().collect();
        (n, m)
    }
}

pub fn all_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "empty sets",
            only_n: 0,
            only_m: 0,
            shared: 0,
            fpr: 0.04,
        },
        Scenario {
            name: "identical sets",
            only_n: 0,
            only_m: 0,
            shared: 1000,
            fpr: 0.44,
        },
        Scenario {
            name: "almost identical sets",
            only_n: 0,
            only_m: 1,
            shared: 1000,
            fpr: 0.4,
        },
        Scenario {
            name: "one empty set",
            only_n: 1000,
            only_m: 0,
            shared: 0,
            fpr: 0.04,
        },
        Scenario {
            name: "disjoint sets",
            only_n: 100,
            only_m: 100,
            shared: 0,
            fpr: 0.4,
        },
    ]
}
