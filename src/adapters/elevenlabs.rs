//! ElevenLabs text-to-speech (primary Narration backend).
//!
//! Endpoint: POST /v1/text-to-speech/{voice_id}
//! Auth: `xi-api-key` header from ELEVENLABS_API_KEY.

use async_trait::async_trait;
use serde_json::json;

use super::media::audio_duration;
use super::{Backend, BackendError, Narration, NarrationRequest};

const DEFAULT_ENDPOINT: &str = "https://api.elevenlabs.io/v1";

pub struct ElevenLabsBackend {
    api_key: Option<String>,
    voice_id: String,
    model_id: String,
    endpoint: String,
    client: reqwest::Client,
}

impl ElevenLabsBackend {
    pub fn new(
        api_key: Option<String>,
        voice_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            api_key,
            voice_id: voice_id.into(),
            model_id: model_id.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create from the ELEVENLABS_API_KEY environment variable
    pub fn from_env(voice_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self::new(std::env::var("ELEVENLABS_API_KEY").ok(), voice_id, model_id)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Backend<NarrationRequest, Narration> for ElevenLabsBackend {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn produce(&self, request: &NarrationRequest) -> Result<Narration, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Unavailable("ELEVENLABS_API_KEY not set".to_string()))?;

        if request.text.trim().is_empty() {
            return Err(BackendError::Failed("narration text is empty".to_string()));
        }

        let url = format!("{}/text-to-speech/{}", self.endpoint, self.voice_id);
        let body = json!({
            "text": request.text,
            "model_id": self.model_id,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
                "speed": request.speed.clamp(0.7, 1.2),
            }
        });

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .header("accept", "audio/mpeg")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &text));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(BackendError::Malformed("empty audio body".to_string()));
        }

        tokio::fs::create_dir_all(&request.output_dir).await?;
        let path = request.output_path("mp3");
        tokio::fs::write(&path, &bytes).await?;

        let words = request.text.split_whitespace().count();
        let duration_secs = audio_duration(&path, words, request.speed).await;

        tracing::debug!(path = %path.display(), duration_secs, "ElevenLabs narration written");

        Ok(Narration {
            path,
            duration_secs,
        })
    }
}
