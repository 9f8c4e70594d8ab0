//! Store Tests
//!
//! Records, the snapshot codec and the ordered store.

mod snapshot_tests;
