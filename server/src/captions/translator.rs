//! Translation Collaborator
//!
//! Client for the external text-translation provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parla_common::{Language, RoomId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

/// Request body sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslateRequest {
    pub text: String,
    pub from_language: Language,
    pub to_language: Language,
    pub room_id: RoomId,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translated_text: String,
}

/// Translation failures. All of them are isolated to one target language.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Translation provider is not configured")]
    NotConfigured,

    #[error("Translation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Translation provider returned status {0}")]
    Status(u16),

    #[error("Translation provider error: {0}")]
    Provider(String),
}

/// External translation capability.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslateError>;
}

/// Provider reached over HTTP.
pub struct HttpTranslator {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpTranslator {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TranslateError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslateError> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(
                status = status.as_u16(),
                to = %request.to_language,
                "Translation provider rejected request"
            );
            return Err(TranslateError::Status(status.as_u16()));
        }

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::Provider(format!("malformed response: {e}")))?;

        debug!(
            from = %request.from_language,
            to = %request.to_language,
            "Translation completed"
        );
        Ok(body.translated_text)
    }
}

/// Stand-in used when no provider URL is configured.
pub struct UnconfiguredTranslator;

#[async_trait]
impl Translator for UnconfiguredTranslator {
    async fn translate(&self, _request: &TranslateRequest) -> Result<String, TranslateError> {
        Err(TranslateError::NotConfigured)
    }
}

/// Build the translator described by the configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn Translator>, TranslateError> {
    match &config.translate_url {
        Some(url) => Ok(Arc::new(HttpTranslator::new(
            url.clone(),
            config.translate_api_key.clone(),
            config.translate_timeout,
        )?)),
        None => {
            warn!("TRANSLATE_URL not set, only same-language captions will be delivered");
            Ok(Arc::new(UnconfiguredTranslator))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_translator_fails() {
        let request = TranslateRequest {
            text: "ciao".into(),
            from_language: Language::parse("it").unwrap(),
            to_language: Language::parse("es").unwrap(),
            room_id: RoomId::parse("abc123").unwrap(),
        };
        let err = UnconfiguredTranslator.translate(&request).await.unwrap_err();
        assert!(matches!(err, TranslateError::NotConfigured));
    }

    #[test]
    fn test_request_wire_shape() {
        let request = TranslateRequest {
            text: "ciao".into(),
            from_language: Language::parse("it").unwrap(),
            to_language: Language::parse("es").unwrap(),
            room_id: RoomId::parse("abc123").unwrap(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "text": "ciao",
                "from_language": "it",
                "to_language": "es",
                "room_id": "abc123",
            })
        );
    }

    #[test]
    fn test_from_config_without_url() {
        let config = Config::default_for_test();
        assert!(from_config(&config).is_ok());
    }
}
