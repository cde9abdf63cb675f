use crate::core::document::{DocumentNode, NodeKind, NodePatch};
use crate::core::library::{Library, LibraryStore};
use crate::core::state::{BackgroundMood, Character, SavedWork};
use crate::services::ai::{AiGateway, ArchitectAction};
use crate::services::narration::NarrationRequest;
use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

/// The single writer of the open work. AI results are merged into the tree
/// here; pipelines only ever see snapshots.
pub struct Editor {
    ai: Arc<AiGateway>,
    work: SavedWork,
    selected_id: String,
    /// Scene illustrations of this session, by node id.
    scenes: HashMap<String, Vec<u8>>,
}

impl Editor {
    pub fn open(ai: Arc<AiGateway>, work: SavedWork) -> Self {
        let selected_id = work.tree.id.clone();
        info!("Opened '{}' ({} nodes)", work.title, work.tree.count_nodes());
        Self {
            ai,
            work,
            selected_id,
            scenes: HashMap::new(),
        }
    }

    pub fn work(&self) -> &SavedWork {
        &self.work
    }

    pub fn tree(&self) -> &DocumentNode {
        &self.work.tree
    }

    pub fn selected(&self) -> Result<&DocumentNode> {
        self.work
            .tree
            .find(&self.selected_id)
            .ok_or_else(|| anyhow!("Node '{}' is not in this work", self.selected_id))
    }

    pub fn select(&mut self, id: &str) -> Result<()> {
        if self.work.tree.find(id).is_none() {
            bail!("Node '{}' is not in this work", id);
        }
        self.selected_id = id.to_string();
        Ok(())
    }

    pub fn set_premise(&mut self, premise: impl Into<String>) {
        self.work.premise = premise.into();
    }

    pub fn set_setting(&mut self, setting: impl Into<String>) {
        self.work.setting = setting.into();
    }

    fn patch(&mut self, id: &str, patch: &NodePatch) -> Result<()> {
        if !self.work.tree.patch_in_place(id, patch) {
            bail!("Node '{}' is not in this work", id);
        }
        Ok(())
    }

    /// Renaming the root renames the work too.
    pub fn rename(&mut self, id: &str, title: impl Into<String>) -> Result<()> {
        let title = title.into();
        self.patch(id, &NodePatch::title(title.clone()))?;
        if id == self.work.tree.id {
            self.work.title = title;
        }
        Ok(())
    }

    pub fn set_content(&mut self, id: &str, content: impl Into<String>) -> Result<()> {
        self.patch(id, &NodePatch::content(content))
    }

    pub fn toggle_expanded(&mut self, id: &str) -> Result<bool> {
        let expanded = !self
            .work
            .tree
            .find(id)
            .ok_or_else(|| anyhow!("Node '{}' is not in this work", id))?
            .expanded;
        self.patch(
            id,
            &NodePatch {
                expanded: Some(expanded),
                ..Default::default()
            },
        )?;
        Ok(expanded)
    }

    /// Manually adds one empty node at the end of `parent_id`'s children.
    pub fn insert_node(&mut self, parent_id: &str, kind: NodeKind, title: &str) -> Result<String> {
        if self.work.tree.find(parent_id).is_none() {
            bail!("Node '{}' is not in this work", parent_id);
        }
        let node = DocumentNode::new(kind, title);
        let id = node.id.clone();
        self.work.tree = self.work.tree.append_children(parent_id, vec![node])?;
        Ok(id)
    }

    /// Runs the architect on the selected node. A full structure replaces its
    /// children, deepening appends to them. Returns the number of new
    /// top-level nodes.
    pub async fn architect(&mut self, action: ArchitectAction) -> Result<usize> {
        if self.work.premise.trim().is_empty() {
            bail!("Describe the premise before asking the architect.");
        }
        let target = self.selected()?.clone();
        let nodes = self
            .ai
            .architect_structure(
                &target,
                action,
                &self.work.premise,
                &self.work.setting,
                &self.work.characters,
            )
            .await?;
        let added = nodes.len();

        let tree = match action {
            ArchitectAction::FullStructure => {
                let cleared = self.work.tree.clear_children(&target.id);
                cleared.append_children(&target.id, nodes)?
            }
            ArchitectAction::Deepen => self.work.tree.append_children(&target.id, nodes)?,
        };
        self.work.tree = tree.update(
            &target.id,
            &NodePatch {
                expanded: Some(true),
                ..Default::default()
            },
        );
        info!("Architect added {} nodes under '{}'", added, target.title);
        Ok(added)
    }

    /// Appends freshly written prose to the selected node. Returns the
    /// number of characters added.
    pub async fn write_prose(&mut self) -> Result<usize> {
        let target = self.selected()?.clone();
        let prose = self
            .ai
            .write_prose(
                &target,
                &self.work.premise,
                &self.work.setting,
                &self.work.characters,
            )
            .await?;
        let content = format!("{}\n\n{}", target.content, prose);
        self.patch(&target.id, &NodePatch::content(content))?;
        Ok(prose.chars().count())
    }

    /// Adds a placeholder character and returns its id.
    pub fn add_character(&mut self) -> String {
        let character = Character::new("New character");
        let id = character.id.clone();
        self.work.characters.push(character);
        id
    }

    pub fn update_character<F>(&mut self, id: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Character),
    {
        let character = self
            .work
            .characters
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow!("Character '{}' not found", id))?;
        edit(character);
        Ok(())
    }

    /// Snapshot of the selected node for the narration pipeline, voiced with
    /// the given character.
    pub fn narration_request(
        &self,
        character_id: Option<&str>,
        atmosphere: Option<String>,
    ) -> Result<NarrationRequest> {
        let node = self.selected()?;
        let character_voice = character_id
            .and_then(|id| self.work.character(id))
            .and_then(|c| c.voice_name);
        let title = if node.title.trim().is_empty() {
            "New chapter".to_string()
        } else {
            node.title.clone()
        };
        Ok(NarrationRequest {
            text: node.content.clone(),
            title,
            atmosphere,
            character_voice,
        })
    }

    /// "{title}: {summary}" of the selected node, falling back to the premise.
    pub fn video_context(&self) -> Result<String> {
        let node = self.selected()?;
        let summary = if node.summary.trim().is_empty() {
            &self.work.premise
        } else {
            &node.summary
        };
        Ok(format!("{}: {}", node.title, summary))
    }

    /// Illustrates the selected node from its summary (or its title when the
    /// summary is empty) and keeps the picture for that node.
    pub async fn draw_scene(&mut self) -> Result<Vec<u8>> {
        let node = self.selected()?;
        let prompt = if node.summary.trim().is_empty() {
            node.title.clone()
        } else {
            node.summary.clone()
        };
        let id = node.id.clone();
        let png = self.ai.draw_scene(&prompt).await?;
        info!("Scene for '{}' drawn ({} bytes)", id, png.len());
        self.scenes.insert(id, png.clone());
        Ok(png)
    }

    pub fn scene(&self, id: &str) -> Option<&[u8]> {
        self.scenes.get(id).map(Vec::as_slice)
    }

    /// Renders the selected node as a short video against `mood`, starting
    /// from its scene illustration when one was drawn.
    pub async fn generate_video(&self, mood: &BackgroundMood) -> Result<Vec<u8>> {
        let context = self.video_context()?;
        let reference = self.scene(&self.selected()?.id);
        self.ai
            .generate_video(&context, reference, Some(mood.visual_prompt))
            .await
    }

    /// Commits the open work into `library` and persists the whole library.
    pub async fn save(&mut self, library: &mut Library, store: &LibraryStore) -> Result<()> {
        self.work.last_updated = Utc::now();
        if !library.commit(&self.work) {
            bail!("Work '{}' is no longer in the library", self.work.title);
        }
        store.save(library).await
    }
}
