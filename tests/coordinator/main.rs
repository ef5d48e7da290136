//! Coordinator end-to-end test suite
//!
//! Drives the public `txcoord` API the way an application container would.
//!
//! ## Test Tier Structure
//!
//! - **Tier 1: Outcome guarantees** (all-or-nothing across resources)
//! - **Tier 2: Task association** (suspend, resume, ownership)
//! - **Tier 3: Crash recovery** (restart over the same data directory)
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test coordinator
//! ```

mod test_utils;

mod tier1_outcomes;
mod tier2_task_association;
mod tier3_crash_recovery;
