//! Shared utilities for tabflow integration tests.

#![allow(unused_imports)]

pub mod harness;

pub use harness::{drain, wait_until, TestHarness};
