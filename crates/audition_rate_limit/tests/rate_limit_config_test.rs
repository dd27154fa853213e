//! Tests for the layered configuration and admission policy.

use audition_rate_limit::{Admission, AuditionConfig, RateLimits};
use std::io::Write;
use tempfile::Builder;

fn config_from(toml: &str) -> anyhow::Result<AuditionConfig> {
    let mut temp_file = Builder::new().suffix(".toml").tempfile()?;
    writeln!(temp_file, "{}", toml)?;
    Ok(AuditionConfig::from_file(temp_file.path())?)
}

#[test]
fn test_load_bundled_defaults() -> anyhow::Result<()> {
    let config = AuditionConfig::load()?;

    let anthropic = config.provider("anthropic").expect("anthropic configured");
    assert_eq!(anthropic.max_requests_per_batch, Some(100_000));
    assert!(!anthropic.self_managed);

    let tier = config.get_tier("openai", None).expect("openai default tier");
    assert_eq!(tier.name, "Tier 1");
    assert_eq!(tier.rpm, Some(500));

    assert_eq!(config.orchestrator.max_submit_retries, 3);
    assert_eq!(config.reconciler.staleness_secs, 3_600);
    Ok(())
}

#[test]
fn test_lookups_are_case_insensitive() -> anyhow::Result<()> {
    let config = AuditionConfig::load()?;

    assert!(config.provider("Anthropic").is_some());
    assert_eq!(
        config.limits_for("OPENAI", "GPT-4o"),
        config.limits_for("openai", "gpt-4o")
    );
    Ok(())
}

#[test]
fn test_model_override_applies_over_tier() -> anyhow::Result<()> {
    let config = config_from(
        r#"
[providers.acme]
default_tier = "base"

[providers.acme.tiers.base]
name = "Base"
rpm = 42
tpm = 999_000

[providers.acme.tiers.base.models."Big-Model"]
tpm = 10_000
"#,
    )?;

    assert_eq!(
        config.limits_for("acme", "big-model"),
        Admission::Throttled(RateLimits::new(42, 10_000))
    );
    assert_eq!(
        config.limits_for("acme", "small-model"),
        Admission::Throttled(RateLimits::new(42, 999_000))
    );
    Ok(())
}

#[test]
fn test_self_managed_only_when_flagged() -> anyhow::Result<()> {
    let config = config_from(
        r#"
[providers.gateway]
default_tier = "any"
self_managed = true

[providers.gateway.tiers.any.models."pinned"]
rpm = 5
tpm = 5_000

[rate_limit.default]
rpm = 3
tpm = 7_000
"#,
    )?;

    assert_eq!(config.limits_for("gateway", "unlisted"), Admission::SelfManaged);
    // an explicit override still throttles
    assert_eq!(
        config.limits_for("gateway", "pinned"),
        Admission::Throttled(RateLimits::new(5, 5_000))
    );
    // unknown providers never go unthrottled
    assert_eq!(
        config.limits_for("mystery", "model"),
        Admission::Throttled(RateLimits::new(3, 7_000))
    );
    Ok(())
}

#[test]
fn test_partial_tier_falls_back_to_default_limits() -> anyhow::Result<()> {
    let config = config_from(
        r#"
[providers.acme]
default_tier = "base"

[providers.acme.tiers.base]
name = "Base"
rpm = 8

[rate_limit.default]
rpm = 1
tpm = 1_234
"#,
    )?;

    assert_eq!(
        config.limits_for("acme", "m"),
        Admission::Throttled(RateLimits::new(8, 1_234))
    );
    Ok(())
}

#[test]
fn test_missing_sections_use_defaults() -> anyhow::Result<()> {
    let config = config_from("[providers]\n")?;
    assert_eq!(config.orchestrator.status_concurrency, 8);
    assert_eq!(config.reconciler.lookback_secs, 172_800);
    assert_eq!(
        config.limits_for("anthropic", "m"),
        Admission::Throttled(RateLimits::new(10, 20_000))
    );
    Ok(())
}
