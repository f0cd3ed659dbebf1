//! Shared test utilities for galleryd integration tests.
//!
//! - `TestHarness` wires an engine over a temp database and storage root
//! - `FakeFetcher` and `RecordingDispatcher` stand in for gallery-dl and
//!   the worker pool

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::*;
