use crate::core::config::BackendConfig;
use crate::core::error::PipelineError;
use crate::core::state::{Attachment, ChunkCharacter, ScriptChunk};
use crate::utils::media::{encode_data_url, FALLBACK_MIME};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{header, Client, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

// --- Wire types ---

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DescriptionRequest {
    pub prompt: String,
    /// Some backends read the prompt under this key instead.
    #[serde(rename = "tempPrompt")]
    pub temp_prompt: String,
}

impl DescriptionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            temp_prompt: prompt.clone(),
            prompt,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScriptCharacter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScriptRequest {
    pub prompt: String,
    pub characters: Vec<ScriptCharacter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<Attachment>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VideoRequest {
    pub script: Vec<ScriptChunk>,
    #[serde(rename = "firstFrame", skip_serializing_if = "Option::is_none")]
    pub first_frame: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub characters: Vec<ChunkCharacter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CharacterDraft {
    pub name: String,
    pub description: String,
    /// Bare base64, without a data URL header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

// --- Traits ---

/// The opaque generation service. Responses come back as raw JSON; shaping
/// them is the caller's job (see `utils::normalize`).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Base URL that relative asset paths are resolved against.
    fn base_url(&self) -> &str;

    async fn generate_description(
        &self,
        request: &DescriptionRequest,
    ) -> Result<Value, PipelineError>;
    async fn generate_image(&self, request: &ImageRequest) -> Result<Value, PipelineError>;
    async fn generate_script(&self, request: &ScriptRequest) -> Result<Value, PipelineError>;
    async fn generate_video(&self, request: &VideoRequest) -> Result<Value, PipelineError>;

    async fn list_characters(&self) -> Result<Value, PipelineError>;
    async fn create_character(&self, draft: &CharacterDraft) -> Result<Value, PipelineError>;
    async fn delete_character(&self, id: &str) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_image(&self, url: &str) -> Result<FetchedImage, PipelineError>;
}

// --- HTTP implementation ---

pub struct HttpBackend {
    config: BackendConfig,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Value, PipelineError> {
        let endpoint = endpoint_name(path);
        let url = self.config.endpoint(path);
        let max_attempts = self.config.retry_count + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match self.client.post(&url).json(body).send().await {
                Ok(resp) => read_json(&endpoint, resp).await,
                Err(source) => Err(PipelineError::Network {
                    endpoint: endpoint.clone(),
                    source,
                }),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!("{} (attempt {}/{}), retrying...", e, attempt, max_attempts);
                    sleep(Duration::from_secs(self.config.retry_delay_seconds)).await;
                }
                other => return other,
            }
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, PipelineError> {
        let endpoint = endpoint_name(path);
        let resp = self
            .client
            .get(self.config.endpoint(path))
            .send()
            .await
            .map_err(|source| PipelineError::Network {
                endpoint: endpoint.clone(),
                source,
            })?;
        read_json(&endpoint, resp).await
    }
}

fn endpoint_name(path: &str) -> String {
    path.trim_matches('/').to_string()
}

async fn ensure_success(endpoint: &str, resp: Response) -> Result<Response, PipelineError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body
    };
    Err(PipelineError::Transport {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
    })
}

async fn read_json(endpoint: &str, resp: Response) -> Result<Value, PipelineError> {
    let resp = ensure_success(endpoint, resp).await?;
    let content_type = content_type_of(&resp);
    let bytes = resp.bytes().await.map_err(|source| PipelineError::Network {
        endpoint: endpoint.to_string(),
        source,
    })?;
    debug!("{} answered {} bytes ({:?})", endpoint, bytes.len(), content_type);
    Ok(decode_body(content_type.as_deref(), &bytes))
}

fn content_type_of(resp: &Response) -> Option<String> {
    resp.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// JSON bodies are parsed; anything else passes through as a string value.
/// Non-UTF-8 bodies become a data URL so the bytes survive.
pub fn decode_body(content_type: Option<&str>, bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        Err(_) => {
            let mime = content_type
                .and_then(|ct| ct.split(';').next())
                .map(str::trim)
                .filter(|ct| !ct.is_empty())
                .unwrap_or(FALLBACK_MIME);
            Value::String(encode_data_url(bytes, mime))
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn generate_description(
        &self,
        request: &DescriptionRequest,
    ) -> Result<Value, PipelineError> {
        self.post_json(&self.config.description_path, request).await
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<Value, PipelineError> {
        self.post_json(&self.config.image_path, request).await
    }

    async fn generate_script(&self, request: &ScriptRequest) -> Result<Value, PipelineError> {
        self.post_json(&self.config.script_path, request).await
    }

    async fn generate_video(&self, request: &VideoRequest) -> Result<Value, PipelineError> {
        self.post_json(&self.config.video_path, request).await
    }

    async fn list_characters(&self) -> Result<Value, PipelineError> {
        self.get_json(&self.config.characters_path).await
    }

    async fn create_character(&self, draft: &CharacterDraft) -> Result<Value, PipelineError> {
        self.post_json(&self.config.characters_path, draft).await
    }

    async fn delete_character(&self, id: &str) -> Result<(), PipelineError> {
        let path = format!("{}/{}", self.config.characters_path.trim_end_matches('/'), id);
        let endpoint = endpoint_name(&path);
        let resp = self
            .client
            .delete(self.config.endpoint(&path))
            .send()
            .await
            .map_err(|source| PipelineError::Network {
                endpoint: endpoint.clone(),
                source,
            })?;
        ensure_success(&endpoint, resp).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageFetcher for HttpBackend {
    async fn fetch_image(&self, url: &str) -> Result<FetchedImage, PipelineError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| PipelineError::Network {
                endpoint: url.to_string(),
                source,
            })?;
        let resp = ensure_success(url, resp).await?;
        let content_type = content_type_of(&resp);
        let bytes = resp.bytes().await.map_err(|source| PipelineError::Network {
            endpoint: url.to_string(),
            source,
        })?;
        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
