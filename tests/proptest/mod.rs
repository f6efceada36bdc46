// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for admission arithmetic and validation
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Quantity parsing never panics and agrees across equivalent notations
//! 2. Scaled requests never exceed their limits and never go negative
//! 3. Validation is deterministic and never panics

#[path = "../common/mod.rs"]
mod common;

use common::*;
use proptest::prelude::*;

use overcommit_operator::admission::quantity::{cpu_millis, memory_bytes, parse_nanos, scale};
use overcommit_operator::admission::{Ratios, mutation_patch};
use overcommit_operator::webhooks::policies::{ClassValidationContext, validate_all};

// =============================================================================
// Strategies
// =============================================================================

/// Ratios valid for a PolicyClass: (0, 1] in steps of 0.0001
fn valid_ratio() -> impl Strategy<Value = f64> {
    (1u32..=10_000).prop_map(|n| f64::from(n) / 10_000.0)
}

fn memory_suffix() -> impl Strategy<Value = (&'static str, i128)> {
    prop_oneof![
        Just(("", 1)),
        Just(("k", 1_000)),
        Just(("M", 1_000_000)),
        Just(("Ki", 1_024)),
        Just(("Mi", 1_048_576)),
        Just(("Gi", 1_073_741_824)),
    ]
}

// =============================================================================
// Quantity parsing
// =============================================================================

proptest! {
    #[test]
    fn parse_never_panics(input in "\\PC{0,12}") {
        let _ = parse_nanos(&input);
    }

    #[test]
    fn cores_and_millicores_agree(cores in 0u32..512) {
        let whole = cpu_millis(&cores.to_string()).unwrap();
        let millis = cpu_millis(&format!("{}m", u64::from(cores) * 1000)).unwrap();
        prop_assert_eq!(whole, millis);
        prop_assert_eq!(whole, i128::from(cores) * 1000);
    }

    #[test]
    fn memory_suffixes_multiply(value in 0u32..100_000, (suffix, factor) in memory_suffix()) {
        let bytes = memory_bytes(&format!("{value}{suffix}")).unwrap();
        prop_assert_eq!(bytes, i128::from(value) * factor);
    }

    #[test]
    fn scale_stays_within_limit(value in 0i128..1_000_000_000_000, ratio in valid_ratio()) {
        let scaled = scale(value, ratio);
        prop_assert!(scaled >= 0);
        prop_assert!(scaled <= value);
    }

    #[test]
    fn scale_matches_fixed_point_floor(value in 0i128..1_000_000_000_000, basis_points in 1i128..=10_000) {
        let ratio = basis_points as f64 / 10_000.0;
        prop_assert_eq!(scale(value, ratio), value * basis_points / 10_000);
    }
}

// =============================================================================
// Mutation
// =============================================================================

proptest! {
    #[test]
    fn requests_never_exceed_limits(
        cpu_millis_limit in 1u32..64_000,
        memory_mi in 1u32..65_536,
        cpu in valid_ratio(),
        memory in valid_ratio(),
    ) {
        let cpu_limit = format!("{cpu_millis_limit}m");
        let memory_limit = format!("{memory_mi}Mi");
        let pod = pod_with_limits(&[("cpu", cpu_limit.as_str()), ("memory", memory_limit.as_str())]);

        let ops = mutation_patch(&pod, Ratios::new(cpu, memory)).unwrap();
        let mut value = serde_json::to_value(&pod).unwrap();
        json_patch::patch(&mut value, &ops).unwrap();

        let requests = &value["spec"]["containers"][0]["resources"]["requests"];
        if cpu < 1.0 {
            let requested = cpu_millis(requests["cpu"].as_str().unwrap()).unwrap();
            prop_assert!(requested <= i128::from(cpu_millis_limit));
        }
        if memory < 1.0 {
            let requested = memory_bytes(requests["memory"].as_str().unwrap()).unwrap();
            prop_assert!(requested <= i128::from(memory_mi) * 1_048_576);
        }
    }

    #[test]
    fn mutation_is_deterministic(cpu in valid_ratio(), memory in valid_ratio()) {
        let pod = pod_with_init(&[("cpu", "1500m"), ("memory", "3Gi")]);
        let first = mutation_patch(&pod, Ratios::new(cpu, memory)).unwrap();
        let second = mutation_patch(&pod, Ratios::new(cpu, memory)).unwrap();
        prop_assert_eq!(first, second);
    }
}

// =============================================================================
// Validation
// =============================================================================

proptest! {
    #[test]
    fn valid_ratios_always_accepted(cpu in valid_ratio(), memory in valid_ratio()) {
        let class = PolicyClassBuilder::new("generated").ratios(cpu, memory).build();
        prop_assert!(validate_all(&ClassValidationContext::new(&class, None, &[])).allowed);
    }

    #[test]
    fn out_of_range_always_rejected(cpu in prop_oneof![-10.0f64..=0.0, 1.0001f64..10.0]) {
        let class = PolicyClassBuilder::new("generated").ratios(cpu, 0.5).build();
        let result = validate_all(&ClassValidationContext::new(&class, None, &[]));
        prop_assert!(!result.allowed);
        prop_assert_eq!(result.reason.as_deref(), Some("InvalidRatio"));
    }

    #[test]
    fn validation_is_deterministic(cpu in -1.0f64..2.0, memory in -1.0f64..2.0, pattern in "[a-z()*^$.-]{0,8}") {
        let class = PolicyClassBuilder::new("generated").ratios(cpu, memory).excluding(&pattern).build();
        let first = validate_all(&ClassValidationContext::new(&class, None, &[]));
        let second = validate_all(&ClassValidationContext::new(&class, None, &[]));
        prop_assert_eq!(first, second);
    }
}
