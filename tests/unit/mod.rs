// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for the overcommit operator
//!
//! This module contains unit tests for:
//! - Derived resource generation (certificates, workloads, services, registrations)
//! - PolicyClass and Pod validation
//! - Request mutation arithmetic
//! - Status conditions and the ClusterPolicy lifecycle
//! - Configuration parsing

#[path = "../common/mod.rs"]
mod common;

mod config;
mod mutation;
mod resources;
mod state_machine;
mod status;
mod validation;
