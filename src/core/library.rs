use crate::core::io::Storage;
use crate::core::state::SavedWork;
use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Every saved work, newest first. Persisted as one JSON array.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(transparent)]
pub struct Library {
    pub works: Vec<SavedWork>,
}

impl Library {
    /// Creates an empty work at the front of the library and returns its id.
    pub fn create_work(&mut self, title: impl Into<String>) -> String {
        let work = SavedWork::new(title);
        let id = work.id.clone();
        self.works.insert(0, work);
        id
    }

    pub fn get(&self, id: &str) -> Option<&SavedWork> {
        self.works.iter().find(|w| w.id == id)
    }

    pub fn delete_work(&mut self, id: &str) -> bool {
        let before = self.works.len();
        self.works.retain(|w| w.id != id);
        self.works.len() != before
    }

    /// Replaces the stored copy of `work` and stamps `last_updated`.
    /// Works that are not in the library are ignored.
    pub fn commit(&mut self, work: &SavedWork) -> bool {
        match self.works.iter_mut().find(|w| w.id == work.id) {
            Some(slot) => {
                *slot = work.clone();
                slot.last_updated = Utc::now();
                true
            }
            None => false,
        }
    }
}

/// Loads and saves the whole library under a single storage key.
pub struct LibraryStore {
    storage: Arc<dyn Storage>,
    key: String,
}

impl LibraryStore {
    pub fn new(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub async fn load(&self) -> Result<Library> {
        if !self.storage.exists(&self.key).await? {
            info!("No library at '{}', starting empty", self.key);
            return Ok(Library::default());
        }

        let bytes = self.storage.read(&self.key).await?;
        let content = String::from_utf8(bytes).context("Library blob is not valid UTF-8")?;
        let library: Library = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse library '{}'", self.key))?;

        for work in &library.works {
            if let Err(e) = work.tree.validate() {
                warn!("Work '{}' has an inconsistent outline: {}", work.title, e);
            }
        }
        info!("Loaded {} works from '{}'", library.works.len(), self.key);
        Ok(library)
    }

    pub async fn save(&self, library: &Library) -> Result<()> {
        let content = serde_json::to_string(library)?;
        self.storage.write(&self.key, content.as_bytes()).await?;
        info!("Saved {} works to '{}'", library.works.len(), self.key);
        Ok(())
    }
}
