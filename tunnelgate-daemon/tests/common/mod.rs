//! Shared helpers for integration tests.

#![allow(dead_code)]

mod harness;

pub use harness::*;
