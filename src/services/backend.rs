use crate::core::state::VoiceName;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    /// When set, the model is asked for JSON matching this schema.
    pub response_schema: Option<Value>,
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerVoice {
    pub speaker: String,
    pub voice: VoiceName,
}

#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub model: String,
    pub script: String,
    pub speakers: Vec<SpeakerVoice>,
}

#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub model: String,
    pub prompt: String,
    /// PNG bytes used as the first frame.
    pub reference_image: Option<Vec<u8>>,
    pub aspect_ratio: String,
    pub resolution: String,
}

/// Handle on a long-running video job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoOperation {
    pub name: String,
    pub done: bool,
    pub video_uri: Option<String>,
    pub error: Option<String>,
}

/// The external generative capability. One method per modality;
/// retry and prompt building live above this seam.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate_text(&self, request: &TextRequest) -> Result<String>;
    /// Returns PNG bytes.
    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>>;
    /// Returns raw 16-bit mono PCM at 24 kHz.
    async fn synthesize_speech(&self, request: &SpeechRequest) -> Result<Vec<u8>>;
    async fn start_video(&self, request: &VideoRequest) -> Result<VideoOperation>;
    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation>;
    async fn download_video(&self, uri: &str) -> Result<Vec<u8>>;
}
