use crate::core::config::{Config, GeminiConfig, VideoConfig};
use crate::core::document::{DocumentNode, NodeKind, NodeMetadata, Pacing};
use crate::core::state::{Character, VoiceName};
use crate::services::backend::{
    GenerativeBackend, ImageRequest, SpeakerVoice, SpeechRequest, TextRequest, VideoRequest,
};
use crate::services::comic::ComicPanel;
use crate::services::retry::RetryPolicy;
use crate::services::script::{strip_code_blocks, RadioScriptGenerator, SpeakerTag};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchitectAction {
    /// Replace the target's children with a complete structure.
    FullStructure,
    /// Append more detail under the target.
    Deepen,
}

/// Node shape the architect model answers with. Everything is optional;
/// the model is not trusted to fill every field.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DraftNode {
    #[serde(rename = "type")]
    kind: String,
    title: String,
    summary: String,
    metadata: Option<DraftMetadata>,
    children: Vec<DraftNode>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DraftMetadata {
    objective: Option<String>,
    conflict: Option<String>,
    pacing: Option<String>,
    location: Option<String>,
}

impl DraftNode {
    fn into_node(self) -> DocumentNode {
        let mut node = DocumentNode::new(NodeKind::from_label(&self.kind), self.title);
        node.summary = self.summary;
        node.metadata = self.metadata.map(|m| NodeMetadata {
            objective: m.objective,
            conflict: m.conflict,
            pacing: m.pacing.as_deref().and_then(Pacing::from_label),
            location: m.location,
        });
        node.children = self.children.into_iter().map(DraftNode::into_node).collect();
        node
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct DraftPanel {
    description: String,
    dialogue: String,
    visual_prompt: String,
}

fn structure_schema() -> Value {
    let leaf = json!({
        "type": "OBJECT",
        "properties": {
            "type": {"type": "STRING"},
            "title": {"type": "STRING"},
            "summary": {"type": "STRING"}
        }
    });
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "type": {"type": "STRING"},
                "title": {"type": "STRING"},
                "summary": {"type": "STRING"},
                "metadata": {
                    "type": "OBJECT",
                    "properties": {
                        "objective": {"type": "STRING"},
                        "conflict": {"type": "STRING"},
                        "pacing": {"type": "STRING"}
                    }
                },
                "children": {"type": "ARRAY", "items": leaf}
            }
        }
    })
}

fn panel_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "description": {"type": "STRING"},
                "dialogue": {"type": "STRING"},
                "visualPrompt": {"type": "STRING"}
            }
        }
    })
}

fn character_names(characters: &[Character]) -> String {
    characters
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parses a JSON array reply. An empty reply counts as an empty array.
fn parse_array<T: for<'de> Deserialize<'de>>(reply: &str, what: &str) -> Result<Vec<T>> {
    let body = strip_code_blocks(reply);
    if body.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&body).with_context(|| format!("Failed to parse {} reply", what))
}

/// Domain-level calls to the generative backend. Every call goes through
/// the retry policy.
pub struct AiGateway {
    backend: Arc<dyn GenerativeBackend>,
    policy: RetryPolicy,
    models: GeminiConfig,
    video: VideoConfig,
    narrator_voice: VoiceName,
    host_name: String,
}

impl AiGateway {
    pub fn new(backend: Arc<dyn GenerativeBackend>, config: &Config) -> Self {
        Self {
            backend,
            policy: RetryPolicy::from(&config.retry),
            models: config.gemini.clone(),
            video: config.video.clone(),
            narrator_voice: config.narration.narrator_voice,
            host_name: config.narration.host_name.clone(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    async fn text(&self, label: &str, request: TextRequest) -> Result<String> {
        debug!("{}: requesting {}", label, request.model);
        self.policy
            .run(label, || self.backend.generate_text(&request))
            .await
    }

    async fn image(&self, label: &str, prompt: String) -> Result<Vec<u8>> {
        let request = ImageRequest {
            model: self.models.image_model.clone(),
            prompt,
        };
        self.policy
            .run(label, || self.backend.generate_image(&request))
            .await
    }

    /// Asks the model for new outline nodes under `target`. The nodes come
    /// back with fresh ids; merging them into the tree is up to the caller.
    pub async fn architect_structure(
        &self,
        target: &DocumentNode,
        action: ArchitectAction,
        premise: &str,
        setting: &str,
        characters: &[Character],
    ) -> Result<Vec<DocumentNode>> {
        let scope = match action {
            ArchitectAction::FullStructure => "the complete structure".to_string(),
            ArchitectAction::Deepen => format!("the details for: {}", target.title),
        };
        let request = TextRequest {
            model: self.models.structure_model.clone(),
            system: Some("You are a master literary architect.".to_string()),
            prompt: format!(
                "Premise: \"{}\". Setting: {}. Characters: {}. Design {}.",
                premise,
                setting,
                character_names(characters),
                scope
            ),
            response_schema: Some(structure_schema()),
            thinking_budget: None,
        };
        let reply = self.text("architect", request).await?;
        let drafts: Vec<DraftNode> = parse_array(&reply, "architect")?;
        let nodes: Vec<DocumentNode> = drafts.into_iter().map(DraftNode::into_node).collect();
        info!(
            "Architect returned {} top-level nodes for '{}'",
            nodes.len(),
            target.title
        );
        Ok(nodes)
    }

    pub async fn write_prose(
        &self,
        node: &DocumentNode,
        premise: &str,
        setting: &str,
        characters: &[Character],
    ) -> Result<String> {
        let cast = characters
            .iter()
            .map(|c| format!("{} ({})", c.name, c.role))
            .collect::<Vec<_>>()
            .join(", ");
        let request = TextRequest {
            model: self.models.prose_model.clone(),
            system: None,
            prompt: format!(
                "Write the chapter: {}. Premise: {}. Setting: {}. Characters: {}.",
                node.title, premise, setting, cast
            ),
            response_schema: None,
            thinking_budget: Some(self.models.prose_thinking_budget),
        };
        self.text("prose", request).await
    }

    pub async fn draw_scene(&self, prompt: &str) -> Result<Vec<u8>> {
        self.image(
            "scene",
            format!("Cinematic concept art for novel: {}. Digital painting, 4k.", prompt),
        )
        .await
    }

    pub async fn script_comic(
        &self,
        chapter_content: &str,
        characters: &[Character],
    ) -> Result<Vec<ComicPanel>> {
        let request = TextRequest {
            model: self.models.structure_model.clone(),
            system: Some("You are a professional comic storyboard artist.".to_string()),
            prompt: format!(
                "Adapt this chapter into a webtoon comic script. Content: {}. Characters: {}.",
                chapter_content,
                character_names(characters)
            ),
            response_schema: Some(panel_schema()),
            thinking_budget: None,
        };
        let reply = self.text("comic script", request).await?;
        let drafts: Vec<DraftPanel> = parse_array(&reply, "comic script")?;
        let millis = chrono::Utc::now().timestamp_millis();
        Ok(drafts
            .into_iter()
            .enumerate()
            .map(|(idx, p)| {
                ComicPanel::new(
                    format!("panel-{}-{}", millis, idx),
                    p.description,
                    p.dialogue,
                    p.visual_prompt,
                )
            })
            .collect())
    }

    pub async fn draw_panel(&self, visual_prompt: &str) -> Result<Vec<u8>> {
        self.image(
            "panel",
            format!(
                "High-quality comic panel art, webtoon style, detailed: {}",
                visual_prompt
            ),
        )
        .await
    }

    /// One rewrite of the whole text into a NARRATOR/CHAR script.
    pub async fn prepare_audio_script(
        &self,
        text: &str,
        chapter_title: &str,
        atmosphere: &str,
    ) -> Result<String> {
        let generator = RadioScriptGenerator::new(self.host_name.clone());
        let request = TextRequest {
            model: self.models.script_model.clone(),
            system: Some(generator.get_system_prompt()),
            prompt: generator.generate_prompt(text, chapter_title, atmosphere),
            response_schema: None,
            thinking_budget: None,
        };
        let reply = self.text("audio script", request).await?;
        Ok(generator.parse_response(&reply, text))
    }

    /// Raw 16-bit PCM for one cleaned script chunk.
    pub async fn synthesize_script(&self, chunk: &str, character_voice: VoiceName) -> Result<Vec<u8>> {
        let request = SpeechRequest {
            model: self.models.tts_model.clone(),
            script: chunk.to_string(),
            speakers: vec![
                SpeakerVoice {
                    speaker: SpeakerTag::Narrator.speaker().to_string(),
                    voice: self.narrator_voice,
                },
                SpeakerVoice {
                    speaker: SpeakerTag::Character.speaker().to_string(),
                    voice: character_voice,
                },
            ],
        };
        let pcm = self
            .policy
            .run("speech", || self.backend.synthesize_speech(&request))
            .await?;
        if pcm.is_empty() {
            bail!("Model returned no audio.");
        }
        Ok(pcm)
    }

    /// Starts a video job, polls until it finishes and downloads the MP4.
    pub async fn generate_video(
        &self,
        story_context: &str,
        reference_image: Option<&[u8]>,
        mood_prompt: Option<&str>,
    ) -> Result<Vec<u8>> {
        let background = mood_prompt
            .filter(|m| !m.trim().is_empty())
            .unwrap_or("a mystical library");
        let request = VideoRequest {
            model: self.models.video_model.clone(),
            prompt: format!(
                "Cinematic video: A character sitting in {} while elements of this story manifest: {}.",
                background, story_context
            ),
            reference_image: reference_image.map(|b| b.to_vec()),
            aspect_ratio: "16:9".to_string(),
            resolution: "720p".to_string(),
        };

        let mut operation = self
            .policy
            .run("video", || self.backend.start_video(&request))
            .await?;
        info!("Video job {} started", operation.name);

        let interval = Duration::from_secs(self.video.poll_interval_secs);
        let mut polls = 0;
        while !operation.done {
            if polls >= self.video.max_polls {
                bail!(
                    "Video job {} did not finish after {} polls",
                    operation.name,
                    polls
                );
            }
            tokio::time::sleep(interval).await;
            let current = operation.clone();
            operation = self
                .policy
                .run("video poll", || self.backend.poll_video(&current))
                .await?;
            polls += 1;
            debug!("Video job {} poll {} done={}", operation.name, polls, operation.done);
        }

        if let Some(err) = &operation.error {
            bail!("Video generation failed: {}", err);
        }
        let uri = operation
            .video_uri
            .ok_or_else(|| anyhow!("Failed to generate video"))?;
        self.policy
            .run("video download", || self.backend.download_video(&uri))
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::backend::VideoOperation;
    use crate::services::retry::ApiError;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    /// Scripted backend: replies are popped in order, requests are recorded.
    #[derive(Default)]
    pub(crate) struct MockBackend {
        pub text_replies: Mutex<VecDeque<Result<String>>>,
        pub speech_replies: Mutex<VecDeque<Result<Vec<u8>>>>,
        pub image_replies: Mutex<VecDeque<Result<Vec<u8>>>>,
        pub polls: Mutex<VecDeque<VideoOperation>>,
        pub text_requests: Mutex<Vec<TextRequest>>,
        pub speech_requests: Mutex<Vec<SpeechRequest>>,
        pub image_requests: Mutex<Vec<ImageRequest>>,
        pub video_requests: Mutex<Vec<VideoRequest>>,
        pub downloads: Mutex<Vec<String>>,
    }

    impl MockBackend {
        pub fn with_text(replies: Vec<Result<String>>) -> Self {
            Self {
                text_replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl GenerativeBackend for MockBackend {
        async fn generate_text(&self, request: &TextRequest) -> Result<String> {
            self.text_requests.lock().unwrap().push(request.clone());
            self.text_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }

        async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>> {
            self.image_requests.lock().unwrap().push(request.clone());
            self.image_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![0x89, b'P', b'N', b'G']))
        }

        async fn synthesize_speech(&self, request: &SpeechRequest) -> Result<Vec<u8>> {
            self.speech_requests.lock().unwrap().push(request.clone());
            self.speech_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![0; 4800]))
        }

        async fn start_video(&self, request: &VideoRequest) -> Result<VideoOperation> {
            self.video_requests.lock().unwrap().push(request.clone());
            Ok(VideoOperation {
                name: "operations/v1".to_string(),
                ..Default::default()
            })
        }

        async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation> {
            Ok(self
                .polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| operation.clone()))
        }

        async fn download_video(&self, uri: &str) -> Result<Vec<u8>> {
            self.downloads.lock().unwrap().push(uri.to_string());
            Ok(b"mp4".to_vec())
        }
    }

    pub(crate) fn gateway(backend: Arc<MockBackend>) -> AiGateway {
        AiGateway::new(backend, &Config::default())
    }

    #[tokio::test]
    async fn test_architect_builds_nested_nodes_with_fresh_ids() {
        let reply = r#"```json
        [
          {"type": "chapter", "title": "Arrival", "summary": "She lands.",
           "metadata": {"objective": "Find shelter", "pacing": "Slow"},
           "children": [{"type": "beat", "title": "Rain"}, {"type": "scene", "title": "Gate"}]},
          {"type": "novel", "title": "Book Two"}
        ]
        ```"#;
        let backend = Arc::new(MockBackend::with_text(vec![Ok(reply.to_string())]));
        let ai = gateway(backend.clone());
        let root = DocumentNode::new_root("Moonfall");

        let nodes = ai
            .architect_structure(
                &root,
                ArchitectAction::FullStructure,
                "A fallen moon",
                "Hanoi",
                &[Character::new("Lan")],
            )
            .await
            .unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].kind, NodeKind::Chapter);
        assert_eq!(nodes[0].summary, "She lands.");
        let meta = nodes[0].metadata.as_ref().unwrap();
        assert_eq!(meta.pacing, Some(Pacing::Slow));
        assert_eq!(meta.objective.as_deref(), Some("Find shelter"));
        assert_eq!(nodes[0].children[0].kind, NodeKind::Beat);
        assert_eq!(nodes[0].children[1].kind, NodeKind::Section);
        assert_eq!(nodes[1].kind, NodeKind::Part);

        let mut ids = HashSet::new();
        for node in &nodes {
            let _ = node.walk(&mut |n| {
                assert!(ids.insert(n.id.clone()));
                std::ops::ControlFlow::<()>::Continue(())
            });
        }
        assert_eq!(ids.len(), 4);
        assert!(root.append_children(&root.id, nodes).is_ok());

        let requests = backend.text_requests.lock().unwrap();
        assert!(requests[0].prompt.contains("Design the complete structure."));
        assert!(requests[0].prompt.contains("Characters: Lan."));
        assert!(requests[0].response_schema.is_some());
    }

    #[tokio::test]
    async fn test_deepen_prompt_names_target_and_empty_reply_is_empty() {
        let backend = Arc::new(MockBackend::with_text(vec![Ok(String::new())]));
        let ai = gateway(backend.clone());
        let mut target = DocumentNode::new(NodeKind::Chapter, "The Gate");
        target.content = "x".to_string();

        let nodes = ai
            .architect_structure(&target, ArchitectAction::Deepen, "p", "s", &[])
            .await
            .unwrap();
        assert!(nodes.is_empty());
        let requests = backend.text_requests.lock().unwrap();
        assert!(requests[0].prompt.ends_with("Design the details for: The Gate."));
    }

    #[tokio::test]
    async fn test_architect_malformed_reply_is_an_error() {
        let backend = Arc::new(MockBackend::with_text(vec![Ok("not json".to_string())]));
        let ai = gateway(backend);
        let root = DocumentNode::new_root("x");
        let err = ai
            .architect_structure(&root, ArchitectAction::FullStructure, "p", "s", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("architect"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_errors_are_retried_through_the_gateway() {
        let backend = Arc::new(MockBackend::with_text(vec![
            Err(ApiError::new(429, "quota").into()),
            Err(ApiError::new(429, "quota").into()),
            Ok("Once upon a time.".to_string()),
        ]));
        let ai = gateway(backend.clone());
        let node = DocumentNode::new(NodeKind::Chapter, "One");
        let mut hero = Character::new("Lan");
        hero.role = crate::core::state::CharacterRole::Protagonist;

        let text = ai.write_prose(&node, "p", "s", &[hero]).await.unwrap();
        assert_eq!(text, "Once upon a time.");

        let requests = backend.text_requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].thinking_budget, Some(8000));
        assert!(requests[0].prompt.contains("Lan (protagonist)"));
    }

    #[tokio::test]
    async fn test_audio_script_falls_back_to_raw_text() {
        let backend = Arc::new(MockBackend::with_text(vec![
            Ok("   ".to_string()),
            Ok("NARRATOR: Hello.".to_string()),
        ]));
        let ai = gateway(backend.clone());

        let script = ai.prepare_audio_script("raw story", "Ch 1", "calm").await.unwrap();
        assert_eq!(script, "raw story");
        let script = ai.prepare_audio_script("raw story", "Ch 1", "calm").await.unwrap();
        assert_eq!(script, "NARRATOR: Hello.");

        let requests = backend.text_requests.lock().unwrap();
        assert!(requests[0].prompt.contains("Gia Dai Tai"));
        assert_eq!(requests[0].model, "gemini-3-flash-preview");
    }

    #[tokio::test]
    async fn test_speech_maps_tags_to_voices() {
        let backend = Arc::new(MockBackend::default());
        let ai = gateway(backend.clone());

        let pcm = ai
            .synthesize_script("NARRATOR: Hi.\nCHAR: Hello.", VoiceName::Puck)
            .await
            .unwrap();
        assert_eq!(pcm.len(), 4800);

        let requests = backend.speech_requests.lock().unwrap();
        assert_eq!(
            requests[0].speakers,
            vec![
                SpeakerVoice { speaker: "NARRATOR".to_string(), voice: VoiceName::Kore },
                SpeakerVoice { speaker: "CHAR".to_string(), voice: VoiceName::Puck },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_audio_is_an_error() {
        let backend = Arc::new(MockBackend::default());
        backend.speech_replies.lock().unwrap().push_back(Ok(Vec::new()));
        let ai = gateway(backend);
        let err = ai.synthesize_script("CHAR: x", VoiceName::Zephyr).await.unwrap_err();
        assert_eq!(err.to_string(), "Model returned no audio.");
    }

    #[tokio::test]
    async fn test_comic_script_assigns_panel_ids_in_order() {
        let reply = r#"[
            {"description": "Rooftop at dusk", "dialogue": "Lan: Now!", "visualPrompt": "girl on rooftop"},
            {"description": "Close-up", "dialogue": "", "visualPrompt": "eyes"}
        ]"#;
        let backend = Arc::new(MockBackend::with_text(vec![Ok(reply.to_string())]));
        let ai = gateway(backend.clone());

        let panels = ai.script_comic("chapter text", &[]).await.unwrap();
        assert_eq!(panels.len(), 2);
        assert!(panels[0].id.starts_with("panel-") && panels[0].id.ends_with("-0"));
        assert!(panels[1].id.ends_with("-1"));
        assert_eq!(panels[0].visual_prompt, "girl on rooftop");
        assert!(panels.iter().all(|p| p.image.is_none() && !p.is_loading));

        ai.draw_panel(&panels[0].visual_prompt).await.unwrap();
        ai.draw_scene("a moonlit lake").await.unwrap();
        let images = backend.image_requests.lock().unwrap();
        assert_eq!(
            images[0].prompt,
            "High-quality comic panel art, webtoon style, detailed: girl on rooftop"
        );
        assert_eq!(
            images[1].prompt,
            "Cinematic concept art for novel: a moonlit lake. Digital painting, 4k."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_polls_until_done_then_downloads() {
        let backend = Arc::new(MockBackend::default());
        {
            let mut polls = backend.polls.lock().unwrap();
            polls.push_back(VideoOperation { name: "operations/v1".into(), ..Default::default() });
            polls.push_back(VideoOperation {
                name: "operations/v1".into(),
                done: true,
                video_uri: Some("https://example.test/v.mp4?alt=media".into()),
                error: None,
            });
        }
        let ai = gateway(backend.clone());

        let started = tokio::time::Instant::now();
        let bytes = ai.generate_video("Ch 1: summary", Some(&[1u8, 2, 3][..]), None).await.unwrap();
        assert_eq!(bytes, b"mp4");
        assert_eq!(started.elapsed(), Duration::from_secs(20));

        let requests = backend.video_requests.lock().unwrap();
        assert_eq!(
            requests[0].prompt,
            "Cinematic video: A character sitting in a mystical library while elements of this story manifest: Ch 1: summary."
        );
        assert_eq!(requests[0].reference_image.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(requests[0].resolution, "720p");
        assert_eq!(requests[0].aspect_ratio, "16:9");
        assert_eq!(backend.downloads.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_gives_up_after_max_polls() {
        let backend = Arc::new(MockBackend::default());
        let mut config = Config::default();
        config.video.max_polls = 3;
        let ai = AiGateway::new(backend.clone(), &config);

        let err = ai.generate_video("ctx", None, Some("a rainy cafe")).await.unwrap_err();
        assert!(err.to_string().contains("did not finish after 3 polls"));
        assert!(backend.video_requests.lock().unwrap()[0].prompt.contains("a rainy cafe"));
        assert!(backend.downloads.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_video_without_uri_fails() {
        let backend = Arc::new(MockBackend::default());
        backend.polls.lock().unwrap().push_back(VideoOperation {
            name: "operations/v1".into(),
            done: true,
            ..Default::default()
        });
        let ai = gateway(backend);
        let err = ai.generate_video("ctx", None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to generate video");
    }
}
