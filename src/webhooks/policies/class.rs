//! PolicyClass policies
//!
//! Ratios must lie in (0, 1] with at most four decimals, the namespace
//! exclusion must be a valid regex, and at most one class may be default.

use kube::ResourceExt;
use regex::Regex;

use super::{ClassValidationContext, ValidationResult};

const PRECISION: f64 = 10_000.0;
const PRECISION_TOLERANCE: f64 = 1e-9;

/// Whether `value` is exactly representable with four decimal digits
pub fn has_four_decimals(value: f64) -> bool {
    ((value * PRECISION).round() / PRECISION - value).abs() <= PRECISION_TOLERANCE
}

fn check_ratio(field: &str, value: f64, class: &str) -> Option<ValidationResult> {
    if !(value > 0.0 && value <= 1.0) {
        return Some(ValidationResult::denied(
            "InvalidRatio",
            &format!(
                "{field} must be greater than 0 and equal or lower than 1, failed creating {class} class"
            ),
        ));
    }
    if !has_four_decimals(value) {
        return Some(ValidationResult::denied(
            "InvalidPrecision",
            &format!("{field} must have 4 decimals max, failed creating {class} class"),
        ));
    }
    None
}

/// Rule: `cpuRatio` and `memoryRatio` are in (0, 1] with at most 4 decimals
pub fn validate_ratios(ctx: &ClassValidationContext) -> ValidationResult {
    let name = ctx.class.name_any();
    let spec = &ctx.class.spec;
    check_ratio("cpuRatio", spec.cpu_ratio, &name)
        .or_else(|| check_ratio("memoryRatio", spec.memory_ratio, &name))
        .unwrap_or_else(ValidationResult::allowed)
}

/// Rule: `excludedNamespaces` compiles as a regular expression
pub fn validate_excluded_namespaces(ctx: &ClassValidationContext) -> ValidationResult {
    match Regex::new(&ctx.class.spec.excluded_namespaces) {
        Ok(_) => ValidationResult::allowed(),
        Err(e) => ValidationResult::denied(
            "InvalidPattern",
            &format!(
                "excludedNamespaces is not a valid regex, failed creating {} class: {e}",
                ctx.class.name_any()
            ),
        ),
    }
}

/// Rule: a class newly marked default is rejected while another is default
///
/// Updating a class that was already default is accepted.
pub fn validate_default_uniqueness(ctx: &ClassValidationContext) -> ValidationResult {
    if !ctx.class.spec.is_default {
        return ValidationResult::allowed();
    }
    if ctx.old_class.is_some_and(|old| old.spec.is_default) {
        return ValidationResult::allowed();
    }

    let name = ctx.class.name_any();
    match ctx
        .existing_classes
        .iter()
        .find(|c| c.spec.is_default && c.name_any() != name)
    {
        Some(other) => ValidationResult::denied(
            "DuplicateDefault",
            &format!(
                "only one PolicyClass can be default, {} is already default, failed creating {name} class",
                other.name_any()
            ),
        ),
        None => ValidationResult::allowed(),
    }
}
