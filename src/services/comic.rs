use crate::core::state::Character;
use crate::services::ai::AiGateway;
use anyhow::{bail, Result};
use log::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ComicPanel {
    pub id: String,
    pub description: String,
    pub dialogue: String,
    pub visual_prompt: String,
    /// PNG bytes once drawn.
    pub image: Option<Vec<u8>>,
    pub is_loading: bool,
}

impl ComicPanel {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        dialogue: impl Into<String>,
        visual_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            dialogue: dialogue.into(),
            visual_prompt: visual_prompt.into(),
            image: None,
            is_loading: false,
        }
    }

    pub fn is_drawn(&self) -> bool {
        self.image.is_some()
    }
}

/// Outcome of a [`ComicBoard::draw_all`] sweep, by panel id.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrawReport {
    pub drawn: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Panels of the chapter currently being adapted.
#[derive(Debug, Default)]
pub struct ComicBoard {
    panels: Vec<ComicPanel>,
}

impl ComicBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn panels(&self) -> &[ComicPanel] {
        &self.panels
    }

    /// Replaces the board with a fresh script of `chapter_content`.
    pub async fn script(
        &mut self,
        ai: &AiGateway,
        chapter_content: &str,
        characters: &[Character],
    ) -> Result<usize> {
        if chapter_content.trim().is_empty() {
            bail!("The selected chapter has no content to adapt.");
        }
        self.panels = ai.script_comic(chapter_content, characters).await?;
        info!("Comic script has {} panels", self.panels.len());
        Ok(self.panels.len())
    }

    /// Draws one panel. Returns `Ok(false)` when no panel has this id.
    pub async fn draw_panel(&mut self, ai: &AiGateway, id: &str) -> Result<bool> {
        let Some(index) = self.panels.iter().position(|p| p.id == id) else {
            return Ok(false);
        };
        self.panels[index].is_loading = true;
        let prompt = self.panels[index].visual_prompt.clone();
        let result = ai.draw_panel(&prompt).await;

        let panel = &mut self.panels[index];
        panel.is_loading = false;
        panel.image = Some(result?);
        Ok(true)
    }

    /// Draws every panel without an image, in order. A failed panel does not
    /// stop the sweep.
    pub async fn draw_all(&mut self, ai: &AiGateway) -> DrawReport {
        let mut report = DrawReport::default();
        let ids: Vec<(String, bool)> = self
            .panels
            .iter()
            .map(|p| (p.id.clone(), p.is_drawn()))
            .collect();

        for (id, drawn) in ids {
            if drawn {
                report.skipped.push(id);
                continue;
            }
            match self.draw_panel(ai, &id).await {
                Ok(_) => report.drawn.push(id),
                Err(e) => {
                    warn!("Panel {} failed to draw: {:#}", id, e);
                    report.failed.push(id);
                }
            }
        }
        report
    }

    pub fn set_dialogue(&mut self, id: &str, dialogue: impl Into<String>) -> bool {
        match self.panels.iter_mut().find(|p| p.id == id) {
            Some(panel) => {
                panel.dialogue = dialogue.into();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ai::tests::{gateway, MockBackend};
    use crate::services::retry::ApiError;
    use std::sync::Arc;

    const SCRIPT: &str = r#"[
        {"description": "One", "dialogue": "A", "visualPrompt": "p1"},
        {"description": "Two", "dialogue": "B", "visualPrompt": "p2"},
        {"description": "Three", "dialogue": "C", "visualPrompt": "p3"}
    ]"#;

    async fn scripted_board(backend: &Arc<MockBackend>) -> ComicBoard {
        backend
            .text_replies
            .lock()
            .unwrap()
            .push_back(Ok(SCRIPT.to_string()));
        let mut board = ComicBoard::new();
        board
            .script(&gateway(backend.clone()), "chapter", &[])
            .await
            .unwrap();
        board
    }

    #[tokio::test]
    async fn test_empty_chapter_is_rejected_before_any_call() {
        let backend = Arc::new(MockBackend::default());
        let mut board = ComicBoard::new();
        assert!(board.script(&gateway(backend.clone()), "  ", &[]).await.is_err());
        assert!(backend.text_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_draw_all_skips_drawn_and_survives_failures() {
        let backend = Arc::new(MockBackend::default());
        let mut board = scripted_board(&backend).await;
        let ai = gateway(backend.clone());
        let ids: Vec<String> = board.panels().iter().map(|p| p.id.clone()).collect();

        assert!(board.draw_panel(&ai, &ids[0]).await.unwrap());
        backend
            .image_replies
            .lock()
            .unwrap()
            .push_back(Err(ApiError::new(500, "boom").into()));

        let report = board.draw_all(&ai).await;
        assert_eq!(report.skipped, vec![ids[0].clone()]);
        assert_eq!(report.failed, vec![ids[1].clone()]);
        assert_eq!(report.drawn, vec![ids[2].clone()]);

        let panels = board.panels();
        assert!(panels.iter().all(|p| !p.is_loading));
        assert!(panels[0].is_drawn());
        assert!(!panels[1].is_drawn());
        assert!(panels[2].is_drawn());

        let prompts: Vec<String> = backend
            .image_requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].ends_with("p2"));
        assert!(prompts[2].ends_with("p3"));
    }

    #[tokio::test]
    async fn test_unknown_panel_and_dialogue_edit() {
        let backend = Arc::new(MockBackend::default());
        let mut board = scripted_board(&backend).await;
        let ai = gateway(backend.clone());

        assert!(!board.draw_panel(&ai, "panel-missing").await.unwrap());
        let id = board.panels()[1].id.clone();
        assert!(board.set_dialogue(&id, "Lan: Run!"));
        assert!(!board.set_dialogue("nope", "x"));
        assert_eq!(board.panels()[1].dialogue, "Lan: Run!");
        assert_eq!(board.panels()[1].visual_prompt, "p2");
    }
}
