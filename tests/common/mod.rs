//! Common test utilities and fixtures shared across all test targets
//!
//! Include this module in a test target:
//! ```rust,ignore
//! #[path = "../common/mod.rs"]
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

mod fixtures;

pub use fixtures::*;
