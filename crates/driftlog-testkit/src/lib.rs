//! # driftlog testkit
//!
//! Testing utilities for driftlog.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Scenarios**: Named set shapes with known reconciliation outcomes
//! - **Simulation**: Filter-only reconciliation of two id sets
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Fast configs, value builders, a loopback engine pair
//!
//! ## Simulation
//!
//! ```rust
//! use driftlog_testkit::scenarios::all_scenarios;
//! use driftlog_testkit::simulation::simulate;
//!
//! let mut rng = rand::thread_rng();
//! for scenario in all_scenarios() {
//!     let (mut n, mut m) = scenario.sets(&mut rng);
//!     let outcome = simulate(&mut n, &mut m, scenario.fpr, 100, &mut rng);
//!     println!("{}: {} rounds", scenario.name, outcome.rounds);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use driftlog_testkit::generators::id_set;
//!
//! proptest! {
//!     #[test]
//!     fn filter_has_no_false_negatives(ids in id_set(100)) {
//!         let mut filter = driftlog_core::BloomFilter::new(ids.len(), 0.1);
//!         filter.extend(ids.iter());
//!         prop_assert!(ids.iter().all(|id| filter.has(id)));
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use driftlog_testkit::fixtures::{commits, SyncPair};
//!
//! async fn example() {
//!     let pair = SyncPair::new(commits("a", 10), commits("b", 10));
//!     pair.engine.sync().await.unwrap();
//!     assert!(pair.converged().await);
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod scenarios;
pub mod simulation;

pub use fixtures::{fast_scheduler_config, fast_sync_config, SyncPair};
pub use scenarios::{all_scenarios, Scenario};
pub use simulation::{simulate, Outcome};
