use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::skills::loader::{load_skill_entry, read_skill_body, sorted_skill_paths};
use crate::skills::types::SkillEntry;

/// Process-wide catalog of capability documents, rebuilt wholesale by [`SkillIndex::scan`].
#[derive(Debug)]
pub struct SkillIndex {
    skills_dir: PathBuf,
    entries: RwLock<BTreeMap<String, SkillEntry>>,
}

impl SkillIndex {
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        SkillIndex {
            skills_dir: skills_dir.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    /// Replaces the index with the current directory contents. Returns the number of skills.
    pub fn scan(&self) -> usize {
        let mut fresh = BTreeMap::new();

        if !self.skills_dir.exists() {
            debug!(
                "Skills directory '{}' not found; index is empty",
                self.skills_dir.display()
            );
        } else {
            match sorted_skill_paths(&self.skills_dir) {
                Ok(paths) => {
                    for path in paths {
                        let entry = load_skill_entry(&path);
                        if let Some(previous) = fresh.insert(entry.name.clone(), entry) {
                            warn!(
                                "Duplicate skill name '{}'; '{}' is replaced",
                                previous.name,
                                previous.path.display()
                            );
                        }
                    }
                }
                Err(err) => warn!("{}", err),
            }
        }

        let count = fresh.len();
        *self.entries.write() = fresh;
        info!("Indexed {} skill(s) from {}", count, self.skills_dir.display());
        count
    }

    pub fn get(&self, name: &str) -> Option<SkillEntry> {
        self.entries.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Full body with front-matter removed; empty when the skill is unknown or unreadable.
    pub fn get_body(&self, name: &str) -> String {
        match self.get(name) {
            Some(entry) => read_skill_body(&entry.path),
            None => String::new(),
        }
    }

    /// Selection menu, one `- name: description` line per skill in name order.
    pub fn menu(&self) -> String {
        self.entries
            .read()
            .values()
            .map(|entry| format!("- {}: {}", entry.name, entry.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
