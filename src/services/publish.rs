use crate::core::io::Storage;
use crate::core::state::SavedWork;
use anyhow::Result;
use log::info;
use std::sync::Arc;

/// Plain-text manuscript: heading, premise, setting, then every node.
pub fn manuscript(work: &SavedWork) -> String {
    format!(
        "# {}\n\nPremise: {}\nSetting: {}\n{}",
        work.tree.title,
        work.premise,
        work.setting,
        work.tree.collect_text()
    )
}

/// File-system friendly stem for `title`. Letters of any script are kept.
pub fn file_stem(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem.to_string()
    }
}

/// Writes finished artifacts through a [`Storage`].
pub struct Publisher {
    storage: Arc<dyn Storage>,
}

impl Publisher {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    async fn write(&self, key: String, bytes: &[u8]) -> Result<String> {
        self.storage.write(&key, bytes).await?;
        info!("Wrote {} ({} bytes)", key, bytes.len());
        Ok(key)
    }

    pub async fn export_manuscript(&self, work: &SavedWork) -> Result<String> {
        let key = format!("{}.txt", file_stem(&work.title));
        self.write(key, manuscript(work).as_bytes()).await
    }

    pub async fn export_audio(&self, title: &str, wav: &[u8]) -> Result<String> {
        self.write(format!("{}.wav", file_stem(title)), wav).await
    }

    pub async fn export_image(&self, title: &str, png: &[u8]) -> Result<String> {
        self.write(format!("{}.png", file_stem(title)), png).await
    }

    pub async fn export_video(&self, title: &str, mp4: &[u8]) -> Result<String> {
        self.write(format!("{}.mp4", file_stem(title)), mp4).await
    }
}
