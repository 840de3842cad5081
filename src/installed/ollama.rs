use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, IntoUrl, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::{Error, ErrorKind, InstalledModel, InstalledModels};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum ApiError {
    #[error("invalid ollama api base: {0}")]
    InvalidApiBase(reqwest::Error),

    #[error("invalid ollama endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("a request to ollama failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("ollama answered {status}: {message}")]
    Status { status: StatusCode, message: String },
}

impl From<ApiError> for Error {
    fn from(value: ApiError) -> Self {
        let kind = match &value {
            ApiError::InvalidApiBase(_) | ApiError::InvalidEndpoint(_) => ErrorKind::InvalidAddress,
            ApiError::RequestFailed(err) if err.is_timeout() => ErrorKind::TimedOut,
            ApiError::RequestFailed(err) if err.is_connect() => ErrorKind::Connection,
            ApiError::RequestFailed(_) => ErrorKind::UnexpectedResponse,
            ApiError::Status { .. } => ErrorKind::Api,
        };

        Error::from_source(kind, Box::new(value))
    }
}

// Structures to deserialize /api/tags

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
    #[serde(default)]
    modified_at: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct TagsList {
    #[serde(default)]
    models: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl From<Tag> for InstalledModel {
    fn from(value: Tag) -> Self {
        InstalledModel {
            name: value.name,
            size: value.size,
            modified: value.modified_at,
        }
    }
}

/// Lists models through the engine's HTTP API (`GET /api/tags`).
pub(crate) struct OllamaInstalled {
    api_base: Url,
    client: Client,
}

impl OllamaInstalled {
    pub(crate) fn with_api_base<U: IntoUrl>(api_base: U) -> Result<OllamaInstalled, Error> {
        let api_base = api_base.into_url().map_err(ApiError::InvalidApiBase)?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ApiError::RequestFailed)?;

        Ok(OllamaInstalled { api_base, client })
    }

    async fn check_status(res: Response) -> Result<Response, ApiError> {
        let status = res.status();

        if status.is_success() {
            return Ok(res);
        }

        let body = res.text().await.unwrap_or_default();

        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => err.error,
            Err(_) => body,
        };

        Err(ApiError::Status { status, message })
    }

    async fn tags(&self) -> Result<Vec<Tag>, ApiError> {
        let url = self.api_base.join("/api/tags")?;

        let res = self.client.get(url).send().await?;

        let res = Self::check_status(res).await?;

        let tags: TagsList = res.json().await?;

        Ok(tags.models)
    }
}

#[async_trait]
impl InstalledModels for OllamaInstalled {
    async fn list_installed(&self) -> Result<Vec<InstalledModel>, Error> {
        let tags = self.tags().await?;

        Ok(tags.into_iter().map(|t| t.into()).collect())
    }
}
