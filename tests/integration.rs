//! Integration tests entry point
//!
//! This file serves as the entry point for all integration tests.
//! It includes the integration_tests module which contains:
//! - Conversion pipeline tests (scan, watch, convert, store)
//! - Supervisor lifecycle and restart policy tests
//! - Content store concurrency tests

mod common;
mod integration_tests;
