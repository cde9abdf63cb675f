use crate::core::config::GeminiConfig;
use crate::services::backend::{
    GenerativeBackend, ImageRequest, SpeechRequest, TextRequest, VideoOperation, VideoRequest,
};
use crate::services::retry::ApiError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!("Gemini API key missing (set gemini.api_key or GEMINI_API_KEY)");
        }
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn send_json<B: Serialize>(&self, url: Url, body: &B) -> Result<String> {
        let resp = self.client.post(url).json(body).send().await?;
        read_body(resp).await
    }

    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        let url = self.endpoint(&format!("models/{}:generateContent", model))?;
        let response_text = self.send_json(url, request).await?;
        let result: GenerateResponse = serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse Gemini response. Body: {}", response_text))?;

        if let Some(err) = result.error {
            return Err(ApiError::new(err.code.unwrap_or(500), err.message).into());
        }
        Ok(result)
    }
}

async fn read_body(resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(ApiError::new(status.as_u16(), text).into());
    }
    Ok(text)
}

// --- Wire types ---

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

impl Content {
    fn user(text: &str) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part::text(text)],
        }
    }

    fn system(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    multi_speaker_voice_config: MultiSpeakerVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MultiSpeakerVoiceConfig {
    speaker_voice_configs: Vec<SpeakerVoiceConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeakerVoiceConfig {
    speaker: String,
    voice_config: VoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ContentResponse>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    code: Option<u16>,
    message: String,
}

impl GenerateResponse {
    fn first_candidate(&self) -> Result<&Candidate> {
        self.candidates
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| anyhow!("Gemini response has no candidates"))
    }

    fn text(&self) -> Result<String> {
        let candidate = self.first_candidate()?;
        let text: String = candidate
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() && candidate.content.is_none() {
            let reason = candidate.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }
        Ok(text)
    }

    fn inline_bytes(&self, what: &str) -> Result<Vec<u8>> {
        let candidate = self.first_candidate()?;
        let data = candidate
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .find_map(|p| p.inline_data.as_ref())
            .ok_or_else(|| anyhow!("Model returned no {}.", what))?;
        BASE64
            .decode(data.data.as_bytes())
            .with_context(|| format!("Invalid base64 {} payload", what))
    }
}

#[derive(Serialize)]
struct PredictRequest {
    instances: Vec<VideoInstance>,
    parameters: VideoParameters,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoInstance {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<VideoImage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoImage {
    bytes_base64_encoded: String,
    mime_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoParameters {
    aspect_ratio: String,
    resolution: String,
    sample_count: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    name: String,
    #[serde(default)]
    done: bool,
    response: Option<Value>,
    error: Option<ErrorBody>,
}

impl From<OperationResponse> for VideoOperation {
    fn from(op: OperationResponse) -> Self {
        let video_uri = op.response.as_ref().and_then(|r| {
            r.pointer("/generateVideoResponse/generatedSamples/0/video/uri")
                .or_else(|| r.pointer("/generatedVideos/0/video/uri"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });
        VideoOperation {
            name: op.name,
            done: op.done,
            video_uri,
            error: op.error.map(|e| e.message),
        }
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate_text(&self, request: &TextRequest) -> Result<String> {
        let mut generation_config = GenerationConfig::default();
        if let Some(schema) = &request.response_schema {
            generation_config.response_mime_type = Some("application/json".to_string());
            generation_config.response_schema = Some(schema.clone());
        }
        if let Some(budget) = request.thinking_budget {
            generation_config.thinking_config = Some(ThinkingConfig {
                thinking_budget: budget,
            });
        }

        let body = GenerateRequest {
            contents: vec![Content::user(&request.prompt)],
            system_instruction: request.system.as_deref().map(Content::system),
            generation_config: Some(generation_config),
        };
        debug!("Gemini text request to {}", request.model);
        self.generate(&request.model, &body).await?.text()
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        let body = GenerateRequest {
            contents: vec![Content::user(&request.prompt)],
            ..Default::default()
        };
        self.generate(&request.model, &body).await?.inline_bytes("image")
    }

    async fn synthesize_speech(&self, request: &SpeechRequest) -> Result<Vec<u8>> {
        let speaker_voice_configs = request
            .speakers
            .iter()
            .map(|s| SpeakerVoiceConfig {
                speaker: s.speaker.clone(),
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: s.voice.as_str().to_string(),
                    },
                },
            })
            .collect();

        let body = GenerateRequest {
            contents: vec![Content::user(&request.script)],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO".to_string()]),
                speech_config: Some(SpeechConfig {
                    multi_speaker_voice_config: MultiSpeakerVoiceConfig {
                        speaker_voice_configs,
                    },
                }),
                ..Default::default()
            }),
        };
        self.generate(&request.model, &body).await?.inline_bytes("audio")
    }

    async fn start_video(&self, request: &VideoRequest) -> Result<VideoOperation> {
        let url = self.endpoint(&format!("models/{}:predictLongRunning", request.model))?;
        let body = PredictRequest {
            instances: vec![VideoInstance {
                prompt: request.prompt.clone(),
                image: request.reference_image.as_ref().map(|png| VideoImage {
                    bytes_base64_encoded: BASE64.encode(png),
                    mime_type: "image/png".to_string(),
                }),
            }],
            parameters: VideoParameters {
                aspect_ratio: request.aspect_ratio.clone(),
                resolution: request.resolution.clone(),
                sample_count: 1,
            },
        };
        let text = self.send_json(url, &body).await?;
        let op: OperationResponse =
            serde_json::from_str(&text).context("Failed to parse video operation")?;
        Ok(op.into())
    }

    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation> {
        let url = self.endpoint(&operation.name)?;
        let resp = self.client.get(url).send().await?;
        let text = read_body(resp).await?;
        let op: OperationResponse =
            serde_json::from_str(&text).context("Failed to parse video operation")?;
        Ok(op.into())
    }

    async fn download_video(&self, uri: &str) -> Result<Vec<u8>> {
        let mut url = Url::parse(uri).with_context(|| format!("Invalid video uri {}", uri))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(ApiError::new(status.as_u16(), text).into());
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_joins_parts() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "NARRATOR: Hello"}, {"text": "\nCHAR: Hi"}], "role": "model"},
                "finishReason": "STOP"
            }]
        }"#;
        let result: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.text().unwrap(), "NARRATOR: Hello\nCHAR: Hi");
    }

    #[test]
    fn test_response_blocked_is_an_error() {
        let json = r#"{"candidates": [{"finishReason": "SAFETY", "index": 0}]}"#;
        let result: GenerateResponse = serde_json::from_str(json).unwrap();
        let err = result.text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_inline_audio_is_decoded() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [{"inlineData": {"mimeType": "audio/L16;rate=24000", "data": "AAEC"}}]}
            }]
        }"#;
        let result: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.inline_bytes("audio").unwrap(), vec![0u8, 1, 2]);

        let empty: GenerateResponse =
            serde_json::from_str(r#"{"candidates": [{"content": {"parts": [{"text": "no"}]}}]}"#)
                .unwrap();
        assert_eq!(
            empty.inline_bytes("audio").unwrap_err().to_string(),
            "Model returned no audio."
        );
    }

    #[test]
    fn test_speech_request_shape() {
        let body = GenerateRequest {
            contents: vec![Content::user("NARRATOR: a\nCHAR: b")],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO".to_string()]),
                speech_config: Some(SpeechConfig {
                    multi_speaker_voice_config: MultiSpeakerVoiceConfig {
                        speaker_voice_configs: vec![SpeakerVoiceConfig {
                            speaker: "NARRATOR".to_string(),
                            voice_config: VoiceConfig {
                                prebuilt_voice_config: PrebuiltVoiceConfig {
                                    voice_name: "Kore".to_string(),
                                },
                            },
                        }],
                    },
                }),
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["generationConfig"]["speechConfig"]["multiSpeakerVoiceConfig"]
                ["speakerVoiceConfigs"][0]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_video_operation_uri_extraction() {
        let json = r#"{
            "name": "models/veo/operations/abc",
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [{"video": {"uri": "https://x/v.mp4?alt=media"}}]}}
        }"#;
        let op: OperationResponse = serde_json::from_str(json).unwrap();
        let op = VideoOperation::from(op);
        assert!(op.done);
        assert_eq!(op.video_uri.as_deref(), Some("https://x/v.mp4?alt=media"));

        let pending: OperationResponse =
            serde_json::from_str(r#"{"name": "operations/1"}"#).unwrap();
        assert!(!VideoOperation::from(pending).done);
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let config = GeminiConfig::default();
        assert!(GeminiClient::new(&config).is_err());
    }
}
