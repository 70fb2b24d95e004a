//! SKILL.md frontmatter handling.
//!
//! Builder instructions and generated artifacts share the SKILL.md layout:
//! YAML frontmatter delimited by `---` followed by a markdown body. The
//! frontmatter is the artifact's declared metadata block.

use anyhow::{bail, Context};
use serde::Deserialize;

/// Name and description declared in an artifact's frontmatter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeclaredMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Extract YAML frontmatter and markdown body from a SKILL.md document.
///
/// Content must start with `---`, and a closing `\n---` separates the YAML
/// from the body. Returns `(yaml_str, body_str)` where the body has leading
/// newlines trimmed.
pub fn extract_frontmatter(content: &str) -> anyhow::Result<(&str, &str)> {
    if !content.starts_with("---") {
        bail!("SKILL.md must start with YAML frontmatter delimiter '---'");
    }

    let after_open = &content[3..];
    let after_open = after_open.strip_prefix('\n').unwrap_or(after_open);

    // An empty block closes immediately on the next line.
    let (yaml_str, remainder) = if let Some(rest) = after_open.strip_prefix("---") {
        ("", rest)
    } else {
        let closing_pos = after_open
            .find("\n---")
            .context("SKILL.md missing closing frontmatter delimiter '---'")?;
        (&after_open[..closing_pos], &after_open[closing_pos + 4..])
    };

    let body_str = remainder
        .strip_prefix('\n')
        .unwrap_or(remainder)
        .trim_start_matches('\n');

    Ok((yaml_str, body_str))
}

/// Parse the declared metadata out of a SKILL.md document.
///
/// Unknown frontmatter keys are ignored. Blank values are reported as absent.
pub fn parse_declared_metadata(content: &str) -> anyhow::Result<DeclaredMetadata> {
    let (yaml_str, _body) = extract_frontmatter(content)?;
    if yaml_str.trim().is_empty() {
        return Ok(DeclaredMetadata::default());
    }

    let mut declared: DeclaredMetadata =
        serde_yaml_ng::from_str(yaml_str).context("Failed to parse SKILL.md YAML frontmatter")?;

    declared.name = declared
        .name
        .map(|n| n.trim().to_owned())
        .filter(|n| !n.is_empty());
    declared.description = declared
        .description
        .map(|d| d.trim().to_owned())
        .filter(|d| !d.is_empty());

    Ok(declared)
}

/// Rewrite the frontmatter `name` field, preserving every other key and the body.
pub fn set_declared_name(content: &str, name: &str) -> anyhow::Result<String> {
    let (yaml_str, body) = extract_frontmatter(content)?;

    let mut value: serde_yaml_ng::Value = if yaml_str.trim().is_empty() {
        serde_yaml_ng::Value::Mapping(serde_yaml_ng::Mapping::new())
    } else {
        serde_yaml_ng::from_str(yaml_str).context("Failed to parse SKILL.md YAML frontmatter")?
    };

    let Some(mapping) = value.as_mapping_mut() else {
        bail!("SKILL.md frontmatter must be a YAML mapping");
    };
    mapping.insert(
        serde_yaml_ng::Value::String("name".to_owned()),
        serde_yaml_ng::Value::String(name.to_owned()),
    );

    let yaml = serde_yaml_ng::to_string(&value).context("Failed to serialize frontmatter")?;
    Ok(format!("---\n{yaml}---\n\n{body}"))
}
