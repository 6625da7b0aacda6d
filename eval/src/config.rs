//! Run configuration merging.
//!
//! Applies case-specific overrides to the base `rff` configuration.

use anyhow::Result;
use rff::config::RunConfig;

use crate::case::CaseFile;

/// Apply the case's variant and config overrides to the base config.
pub fn apply_case_config(mut base: RunConfig, case: &CaseFile) -> Result<RunConfig> {
    let overrides = &case.config;
    if let Some(variant) = case.case.variant {
        base.variant = variant;
    }
    if let Some(max_iterations) = overrides.max_iterations {
        base.max_iterations = max_iterations;
    }
    if let Some(model) = &overrides.model_identifier {
        base.model_identifier = model.clone();
    }
    if let Some(temperature) = overrides.sampling_temperature {
        base.sampling_temperature = temperature;
    }
    if let Some(require) = overrides.require_verified_goal {
        base.require_verified_goal = require;
    }
    if let Some(parse_retries) = overrides.parse_retries {
        base.parse_retries = parse_retries;
    }
    base.validate()?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rff::core::types::Variant;

    fn case(extra: &str) -> CaseFile {
        CaseFile::parse_str(&format!(
            "[case]\nid = \"c\"\ntask = \"game24\"\n{extra}\n[[problems]]\nproblem = \"4 6 1 1\"\n"
        ))
        .expect("case")
    }

    #[test]
    fn preserves_base_when_no_override() {
        let base = RunConfig::default();
        let merged = apply_case_config(base.clone(), &case("")).expect("merge");
        assert_eq!(merged, base);
    }

    #[test]
    fn applies_overrides() {
        let merged = apply_case_config(
            RunConfig::default(),
            &case("variant = \"tree\"\n[config]\nmax_iterations = 5\nmodel_identifier = \"small\""),
        )
        .expect("merge");
        assert_eq!(merged.variant, Variant::Tree);
        assert_eq!(merged.max_iterations, 5);
        assert_eq!(merged.model_identifier, "small");
    }

    #[test]
    fn rejects_invalid_override() {
        let err = apply_case_config(
            RunConfig::default(),
            &case("[config]\nsampling_temperature = 1.5"),
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("sampling_temperature"));
    }
}
