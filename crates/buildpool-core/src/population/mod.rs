//! Builder population business logic.
//!
//! The in-memory replica (`Population`), epsilon-greedy selection, lineage
//! mutation, artifact validation, and add/cull reconciliation. The domain
//! types live in `buildpool-types::builder`; the ports to the authority and
//! the content rewriter are defined next to the logic that drives them.

pub mod authority;
pub mod diff;
pub mod idea;
pub mod manifest;
pub mod mutator;
pub mod reconciler;
pub mod rewriter;
pub mod selector;
pub mod validator;
pub mod weighted;

use buildpool_types::builder::{Builder, BuilderKey};
use buildpool_types::sync::BuilderSummary;
use uuid::Uuid;

/// Result of inserting a builder into the population.
#[derive(Debug)]
pub enum Upsert {
    Inserted,
    /// The previous builder stored under the same key.
    Replaced(Box<Builder>),
}

/// The local replica of the builder pool.
///
/// Builders are kept in insertion order, which is the order the selector
/// walks during roulette selection. Lookups are linear; populations are small.
#[derive(Debug, Clone, Default)]
pub struct Population {
    builders: Vec<Builder>,
}

impl Population {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a population from a list, later duplicates replacing earlier ones
    /// in place.
    pub fn from_builders(builders: impl IntoIterator<Item = Builder>) -> Self {
        let mut population = Self::new();
        for builder in builders {
            population.upsert(builder);
        }
        population
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    pub fn builders(&self) -> &[Builder] {
        &self.builders
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Builder> {
        self.builders.iter()
    }

    pub fn get(&self, key: &BuilderKey) -> Option<&Builder> {
        self.builders.iter().find(|b| &b.key() == key)
    }

    pub fn get_mut(&mut self, key: &BuilderKey) -> Option<&mut Builder> {
        self.builders.iter_mut().find(|b| &b.key() == key)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Builder> {
        self.builders.iter().find(|b| b.id.as_deref() == Some(id))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Builder> {
        self.builders.iter().find(|b| b.name == name)
    }

    /// Resolve a user-supplied reference: a key, an authority id, or a name.
    pub fn resolve(&self, reference: &str) -> Option<&Builder> {
        if let Ok(key) = reference.parse::<BuilderKey>() {
            if let Some(builder) = self.get(&key) {
                return Some(builder);
            }
        }
        self.find_by_name(reference)
    }

    /// Insert a builder, replacing any builder with the same key in place.
    pub fn upsert(&mut self, builder: Builder) -> Upsert {
        let key = builder.key();
        match self.builders.iter().position(|b| b.key() == key) {
            Some(index) => {
                let previous = std::mem::replace(&mut self.builders[index], builder);
                Upsert::Replaced(Box::new(previous))
            }
            None => {
                self.builders.push(builder);
                Upsert::Inserted
            }
        }
    }

    /// Remove a builder by key, returning it if it was present.
    pub fn remove(&mut self, key: &BuilderKey) -> Option<Builder> {
        let index = self.builders.iter().position(|b| &b.key() == key)?;
        Some(self.builders.remove(index))
    }

    /// Assign an authority id to an unpublished draft, keeping its position.
    ///
    /// Returns `None` if no draft with `local_id` exists.
    pub fn mark_published(
        &mut self,
        local_id: Uuid,
        id: String,
        synced_at: chrono::DateTime<chrono::Utc>,
    ) -> Option<&Builder> {
        let builder = self
            .builders
            .iter_mut()
            .find(|b| b.id.is_none() && b.local_id == local_id)?;
        builder.id = Some(id);
        builder.synced_at = Some(synced_at);
        Some(builder)
    }

    /// Sum of all fitness scores.
    pub fn total_fitness(&self) -> f64 {
        self.builders.iter().map(|b| b.fitness_score).sum()
    }

    pub fn max_generation(&self) -> Option<u32> {
        self.builders.iter().map(|b| b.generation).max()
    }

    /// Summaries of every published builder, in population order.
    pub fn summaries(&self) -> Vec<BuilderSummary> {
        self.builders.iter().filter_map(Builder::summary).collect()
    }

    /// Builders not yet published to the authority.
    pub fn drafts(&self) -> impl Iterator<Item = &Builder> {
        self.builders.iter().filter(|b| !b.is_published())
    }
}

impl<'a> IntoIterator for &'a Population {
    type Item = &'a Builder;
    type IntoIter = std::slice::Iter<'a, Builder>;

    fn into_iter(self) -> Self::IntoIter {
        self.builders.iter()
    }
}

/// Test fixtures shared by the population submodules.
#[cfg(test)]
pub(crate) mod fixtures {
    use buildpool_types::builder::{Builder, FileMap};

    /// A published builder with the given id, fitness, and generation.
    pub fn builder(id: &str, fitness: f64, generation: u32) -> Builder {
        let mut b = Builder::genesis(
            format!("builder-{id}"),
            format!("Builder {id}"),
            skill_md(&format!("builder-{id}"), 12),
            FileMap::new(),
        );
        b.id = Some(id.to_owned());
        b.fitness_score = fitness;
        b.generation = generation;
        if generation > 0 {
            b.parent_ids = vec![format!("parent-of-{id}")];
        }
        b
    }

    /// A SKILL.md document with `lines` numbered body lines.
    pub fn skill_md(name: &str, lines: usize) -> String {
        let mut text = format!(
            "---\nname: {name}\ndescription: Generates skills for {name}\n---\n\n# {name}\n\n"
        );
        for i in 0..lines {
            text.push_str(&format!(
                "{i}. Follow step {i} carefully and record the outcome in the log.\n"
            ));
        }
        text
    }
}
