//! Tests for prompt and condition input files.

use audition::inputs::{parse_conditions, parse_prompts, read_conditions, read_prompts};
use audition::{AuditionErrorKind, ProviderKind};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn prompts_parse_one_per_line_skipping_blanks() -> anyhow::Result<()> {
    let text = r#"
{"body": "Write a haiku about rust.", "label": "haiku"}

{"body": "Continue the story."}
"#;
    let prompts = parse_prompts(text)?;

    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0].label.as_deref(), Some("haiku"));
    assert_eq!(prompts[1].body, "Continue the story.");
    assert_eq!(prompts[1].label, None);
    Ok(())
}

#[test]
fn malformed_prompt_line_is_reported_by_number() {
    let text = "{\"body\": \"fine\"}\nnot json\n";
    let err = parse_prompts(text).unwrap_err();

    match err.kind() {
        AuditionErrorKind::Config(e) => assert!(e.message.contains("line 2")),
        other => panic!("Expected config error, got {:?}", other),
    }
}

#[test]
fn empty_prompt_body_is_rejected() {
    assert!(parse_prompts("{\"body\": \"   \"}").is_err());
}

#[test]
fn conditions_parse_with_defaults() -> anyhow::Result<()> {
    let text = r#"
[[conditions]]
slug = "haiku-cold"
provider = "anthropic"
model = "claude-3-5-haiku-latest"
temperature = 0.0
prompt_caching = true

[[conditions]]
slug = "mini-warm"
provider = "openai"
model = "gpt-4o-mini"
version = 3
max_tokens = 256
"#;
    let conditions = parse_conditions(text)?;

    assert_eq!(conditions.len(), 2);
    assert_eq!(conditions[0].provider, ProviderKind::Anthropic);
    assert_eq!(conditions[0].version, 1);
    assert_eq!(conditions[0].max_tokens, 1024);
    assert!(conditions[0].prompt_caching);
    assert_eq!(conditions[1].provider, ProviderKind::OpenAi);
    assert_eq!(conditions[1].version, 3);
    assert_eq!(conditions[1].max_tokens, 256);
    assert_eq!(conditions[1].temperature, None);
    Ok(())
}

#[test]
fn unknown_provider_is_rejected() {
    let text = r#"
[[conditions]]
slug = "x"
provider = "gemini"
model = "gemini-pro"
"#;
    assert!(parse_conditions(text).is_err());
}

#[test]
fn files_are_read_from_disk() -> anyhow::Result<()> {
    let mut prompts = NamedTempFile::new()?;
    writeln!(prompts, "{{\"body\": \"one\"}}")?;
    writeln!(prompts, "{{\"body\": \"two\"}}")?;
    let mut conditions = NamedTempFile::new()?;
    writeln!(
        conditions,
        "[[conditions]]\nslug = \"a\"\nprovider = \"openai\"\nmodel = \"gpt-4o-mini\""
    )?;

    assert_eq!(read_prompts(prompts.path())?.len(), 2);
    assert_eq!(read_conditions(conditions.path())?[0].slug, "a");
    Ok(())
}

#[test]
fn missing_file_is_a_config_error() {
    let err = read_prompts("/nonexistent/prompts.jsonl").unwrap_err();
    assert!(matches!(err.kind(), AuditionErrorKind::Config(_)));
}
