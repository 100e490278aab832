//! Gemini script generation (primary Content backend).
//!
//! Endpoint: POST /v1beta/models/{model}:generateContent
//! Auth: API key from GEMINI_API_KEY, passed through untouched.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Backend, BackendError, ContentRequest};
use crate::domain::Script;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Narration pace used to size the prompt
const WORDS_PER_MINUTE: u32 = 150;

pub struct GeminiBackend {
    api_key: Option<String>,
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

/// Subset of the generateContent response we read
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

/// Script package as the model is asked to return it
#[derive(Debug, Deserialize)]
struct ScriptPackage {
    title: Option<String>,
    script: Option<String>,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

impl GeminiBackend {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create from the GEMINI_API_KEY environment variable
    pub fn from_env(model: impl Into<String>) -> Self {
        Self::new(std::env::var("GEMINI_API_KEY").ok(), model)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn prompt(request: &ContentRequest) -> String {
        let words = request.duration_secs.max(10) * WORDS_PER_MINUTE / 60;
        format!(
            "You write narration for short {niche} videos.\n\
             Write a video package about: {topic}\n\n\
             Return ONLY a JSON object with these keys:\n\
             \"title\": catchy title under 100 characters,\n\
             \"script\": about {words} words of narration, one sentence per line,\n\
             \"description\": two or three sentences for the video description,\n\
             \"tags\": 10 to 15 search tags.\n",
            niche = request.niche.replace('_', " "),
            topic = request.topic,
            words = words,
        )
    }
}

#[async_trait]
impl Backend<ContentRequest, Script> for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn produce(&self, request: &ContentRequest) -> Result<Script, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Unavailable("GEMINI_API_KEY not set".to_string()))?;

        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": Self::prompt(request) }] }]
        });

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &text));
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| BackendError::Malformed("no candidates in response".to_string()))?;

        parse_script_package(&text, request)
    }
}

/// Extract the JSON script package from model output.
///
/// Tolerates code fences and prose around the object. Only the script body
/// is mandatory; other fields get defaults derived from the request.
pub fn parse_script_package(text: &str, request: &ContentRequest) -> Result<Script, BackendError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json_text = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => return Err(BackendError::Malformed("no JSON object in response".to_string())),
    };

    let package: ScriptPackage = serde_json::from_str(json_text)
        .map_err(|e| BackendError::Malformed(format!("script JSON: {}", e)))?;

    let body = package
        .script
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BackendError::Malformed("script is empty".to_string()))?;

    let title = package
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| request.topic.clone());

    let description = package
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| format!("{} - {}", title, request.niche.replace('_', " ")));

    let tags = if package.tags.is_empty() {
        super::template::default_tags(request)
    } else {
        package.tags
    };

    Ok(Script {
        title,
        description,
        tags,
        body,
    })
}
