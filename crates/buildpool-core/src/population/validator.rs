//! Structural validation of builders and generated artifacts.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. Name and description are declared in the frontmatter.
//! 2. The name is 3-50 characters of kebab-case.
//! 3. No supporting file exceeds the size limit.
//! 4. No supporting file path escapes the artifact directory.
//! 5. Mutated drafts only: the content is long enough and differs enough
//!    from the parent.
//!
//! The validator is a pure predicate; callers decide whether a rejection is
//! worth a corrective rewrite.

use buildpool_types::builder::{Artifact, Builder};
use buildpool_types::config::ValidationConfig;
use buildpool_types::error::ArtifactRejection;

use super::diff::line_change_ratio;
use super::manifest::{DeclaredMetadata, parse_declared_metadata};

pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Rules 1-4. Applies to any artifact, builder or generated.
    ///
    /// On success returns the declared metadata so callers don't parse the
    /// frontmatter twice.
    pub fn validate<A: Artifact + ?Sized>(
        &self,
        artifact: &A,
    ) -> Result<DeclaredMetadata, ArtifactRejection> {
        let declared = parse_declared_metadata(artifact.instruction_text())
            .map_err(|e| ArtifactRejection::MissingMetadata(format!("{e:#}")))?;

        let Some(name) = declared.name.as_deref() else {
            return Err(ArtifactRejection::MissingMetadata(
                "frontmatter has no name".to_owned(),
            ));
        };
        if declared.description.is_none() {
            return Err(ArtifactRejection::MissingMetadata(
                "frontmatter has no description".to_owned(),
            ));
        }

        validate_name(name)?;

        for (path, content) in artifact.supporting_files() {
            if content.len() > self.config.max_file_bytes {
                return Err(ArtifactRejection::FileTooLarge {
                    path: path.clone(),
                    size: content.len(),
                    limit: self.config.max_file_bytes,
                });
            }
        }

        for path in artifact.supporting_files().keys() {
            validate_path(path)?;
        }

        Ok(declared)
    }

    /// Rules 1-5 for a freshly mutated draft compared against its parent.
    pub fn validate_mutation(
        &self,
        child: &Builder,
        parent: &Builder,
    ) -> Result<DeclaredMetadata, ArtifactRejection> {
        let declared = self.validate(child)?;

        let length = child.instruction_text.chars().count();
        if length < self.config.min_content_chars {
            return Err(ArtifactRejection::ContentTooShort {
                length,
                minimum: self.config.min_content_chars,
            });
        }

        let ratio = line_change_ratio(&parent.instruction_text, &child.instruction_text);
        if ratio < self.config.min_mutation_delta {
            return Err(ArtifactRejection::InsufficientMutationDelta {
                changed: ratio * 100.0,
                minimum: self.config.min_mutation_delta * 100.0,
            });
        }

        Ok(declared)
    }
}

/// Check a builder or artifact name: 3-50 chars, `[a-z0-9]+(-[a-z0-9]+)*`.
pub fn validate_name(name: &str) -> Result<(), ArtifactRejection> {
    let invalid = |reason: &str| ArtifactRejection::InvalidName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };

    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return Err(invalid(&format!(
            "must be {MIN_NAME_LEN}-{MAX_NAME_LEN} characters, got {len}"
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid("must contain only lowercase letters, digits, and hyphens"));
    }

    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err(invalid("hyphens must separate non-empty segments"));
    }

    Ok(())
}

/// Check a supporting-file path stays inside the artifact directory.
pub fn validate_path(path: &str) -> Result<(), ArtifactRejection> {
    let unsafe_path = || ArtifactRejection::UnsafePath(path.to_owned());

    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return Err(unsafe_path());
    }

    // Drive prefix such as `C:`.
    let mut chars = path.chars();
    if let (Some(first), Some(':')) = (chars.next(), chars.next()) {
        if first.is_ascii_alphabetic() {
            return Err(unsafe_path());
        }
    }

    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(unsafe_path());
    }

    Ok(())
}

/// Check a builder key or authority id is usable as a single directory name.
///
/// Hidden names are reserved for staging and retired directories.
pub fn validate_key(key: &str) -> Result<(), ArtifactRejection> {
    if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\', '\0']) {
        return Err(ArtifactRejection::UnsafePath(key.to_owned()));
    }
    Ok(())
}
