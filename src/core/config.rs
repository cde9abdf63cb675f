use crate::core::state::VoiceName;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_data")]
    pub data_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_library_key")]
    pub library_key: String,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub narration: NarrationConfig,

    #[serde(default)]
    pub video: VideoConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    /// Falls back to the `GEMINI_API_KEY` environment variable when empty.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_pro_model")]
    pub structure_model: String,
    #[serde(default = "default_pro_model")]
    pub prose_model: String,
    #[serde(default = "default_flash_model")]
    pub script_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_video_model")]
    pub video_model: String,
    #[serde(default = "default_thinking_budget")]
    pub prose_thinking_budget: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NarrationConfig {
    #[serde(default = "default_host_name")]
    pub host_name: String,
    #[serde(default = "default_narrator_voice")]
    pub narrator_voice: VoiceName,
    #[serde(default = "default_character_voice")]
    pub fallback_character_voice: VoiceName,
    #[serde(default = "default_atmosphere")]
    pub atmosphere: String,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_chunk_pause_ms")]
    pub chunk_pause_ms: u64,
    #[serde(default = "default_error_display_secs")]
    pub error_display_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VideoConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_data() -> String {
    "data".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_library_key() -> String {
    "library.json".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_pro_model() -> String {
    "gemini-3-pro-preview".to_string()
}
fn default_flash_model() -> String {
    "gemini-3-flash-preview".to_string()
}
fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}
fn default_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}
fn default_video_model() -> String {
    "veo-3.1-fast-generate-preview".to_string()
}
fn default_thinking_budget() -> u32 {
    8000
}
fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_host_name() -> String {
    "Gia Dai Tai".to_string()
}
fn default_narrator_voice() -> VoiceName {
    VoiceName::Kore
}
fn default_character_voice() -> VoiceName {
    VoiceName::Zephyr
}
fn default_atmosphere() -> String {
    "dramatic, heroic".to_string()
}
fn default_max_chunk_chars() -> usize {
    1000
}
fn default_chunk_pause_ms() -> u64 {
    300
}
fn default_error_display_secs() -> u64 {
    5
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_max_polls() -> u32 {
    60
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_gemini_base_url(),
            structure_model: default_pro_model(),
            prose_model: default_pro_model(),
            script_model: default_flash_model(),
            image_model: default_image_model(),
            tts_model: default_tts_model(),
            video_model: default_video_model(),
            prose_thinking_budget: default_thinking_budget(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            narrator_voice: default_narrator_voice(),
            fallback_character_voice: default_character_voice(),
            atmosphere: default_atmosphere(),
            max_chunk_chars: default_max_chunk_chars(),
            chunk_pause_ms: default_chunk_pause_ms(),
            error_display_secs: default_error_display_secs(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_max_polls(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_folder: default_data(),
            output_folder: default_output(),
            library_key: default_library_key(),
            gemini: GeminiConfig::default(),
            retry: RetryConfig::default(),
            narration: NarrationConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{:?} not found. Please create one.", path);
        }

        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let mut config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        if config.gemini.api_key.is_empty() {
            if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                config.gemini.api_key = key;
            }
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}
