//! Idea source port.
//!
//! Ideas are opaque prompts passed through to the rewriter with a mutation
//! directive. The population core never interprets them.

use std::future::Future;

pub trait IdeaSource: Send + Sync {
    /// The next idea, or `None` when the source has nothing to offer.
    fn next_idea(&self) -> impl Future<Output = anyhow::Result<Option<String>>> + Send;
}

/// No ideas at all.
impl IdeaSource for () {
    async fn next_idea(&self) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// A single fixed idea supplied up front (e.g. from a CLI flag).
#[derive(Debug, Clone, Default)]
pub struct FixedIdea(pub Option<String>);

impl IdeaSource for FixedIdea {
    async fn next_idea(&self) -> anyhow::Result<Option<String>> {
        Ok(self.0.clone())
    }
}
