use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{info, instrument, warn};

use crate::config;
use crate::error::{CoreError, Result};
use crate::model::{Credentials, GeneratedArtifact};
use crate::youtube::model::{InsertVideoResponse, TokenResponse};

pub mod model;

const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
    Unlisted,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Unlisted => "unlisted",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub remote_id: String,
    pub url: String,
    /// Fresh credentials obtained while uploading, to be persisted by the caller.
    pub refreshed: Option<Credentials>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn upload(
        &self,
        credentials: &Credentials,
        artifact: &GeneratedArtifact,
        metadata: &VideoMetadata,
        visibility: Visibility,
        publish_at: Option<DateTime<Utc>>,
    ) -> Result<UploadReceipt>;

    async fn refresh_credentials(&self, refresh_token: &str) -> Result<Credentials>;
}

#[derive(Clone)]
pub struct YouTubeClient {
    http: Client,
    api_base: Url,
    token_url: Url,
    client_id: String,
    client_secret: String,
    category_id: String,
}

impl fmt::Debug for YouTubeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YouTubeClient")
            .field("api_base", &self.api_base)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

fn url(value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| CoreError::Configuration(format!("invalid URL '{value}': {e}")))
}

fn transport(err: reqwest::Error) -> CoreError {
    CoreError::Publication(format!("request failed: {err}"))
}

impl YouTubeClient {
    pub fn new(client_id: String, client_secret: String) -> Result<Self> {
        Self::with_base_url(
            client_id,
            client_secret,
            url(YOUTUBE_API_BASE)?,
            url(GOOGLE_TOKEN_URL)?,
        )
    }

    pub fn with_base_url(
        client_id: String,
        client_secret: String,
        api_base: Url,
        token_url: Url,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("clipcast/0.1")
            .no_proxy()
            .build()
            .map_err(|e| CoreError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_base,
            token_url,
            client_id,
            client_secret,
            category_id: "22".into(),
        })
    }

    pub fn from_config(cfg: &config::YouTube) -> Result<Self> {
        let mut client = Self::with_base_url(
            cfg.client_id.clone(),
            cfg.client_secret.clone(),
            url(&cfg.api_base)?,
            url(&cfg.token_url)?,
        )?;
        client.category_id = cfg.category_id.clone();
        Ok(client)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(path)
            .map_err(|e| CoreError::Configuration(format!("invalid YouTube base URL: {e}")))
    }

    async fn start_resumable_upload(
        &self,
        access_token: &str,
        resource: &Value,
        content_length: u64,
    ) -> Result<Url> {
        let mut endpoint = self.endpoint("upload/youtube/v3/videos")?;
        endpoint
            .query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("part", "snippet,status");

        let res = self
            .http
            .post(endpoint)
            .bearer_auth(access_token)
            .header("X-Upload-Content-Type", "video/*")
            .header("X-Upload-Content-Length", content_length.to_string())
            .json(resource)
            .send()
            .await
            .map_err(transport)?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }
        let location = res
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CoreError::Publication("upload session has no Location".into()))?;
        Url::parse(location)
            .map_err(|e| CoreError::Publication(format!("invalid upload session URL: {e}")))
    }

    /// Streams the file from disk into the upload session.
    async fn send_video(&self, access_token: &str, session: Url, path: &Path, len: u64) -> Result<String> {
        let file = tokio::fs::File::open(path).await?;
        let res = self
            .http
            .put(session)
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, "video/mp4")
            .header(CONTENT_LENGTH, len)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(transport)?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }
        let inserted: InsertVideoResponse = res
            .json()
            .await
            .map_err(|e| CoreError::Publication(format!("invalid insert response: {e}")))?;
        Ok(inserted.id)
    }

    async fn set_thumbnail(&self, access_token: &str, video_id: &str, image: &Path) -> Result<()> {
        let bytes = tokio::fs::read(image).await?;
        let mut endpoint = self.endpoint("upload/youtube/v3/thumbnails/set")?;
        endpoint.query_pairs_mut().append_pair("videoId", video_id);
        let res = self
            .http
            .post(endpoint)
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, image_content_type(image))
            .body(bytes)
            .send()
            .await
            .map_err(transport)?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for YouTubeClient {
    #[instrument(skip_all, fields(title = %metadata.title, visibility = visibility.as_str()))]
    async fn upload(
        &self,
        credentials: &Credentials,
        artifact: &GeneratedArtifact,
        metadata: &VideoMetadata,
        visibility: Visibility,
        publish_at: Option<DateTime<Utc>>,
    ) -> Result<UploadReceipt> {
        // Access tokens are short-lived; always start from a fresh one.
        let refreshed = match self.refresh_credentials(&credentials.refresh_token).await {
            Ok(fresh) => Some(fresh),
            Err(err) if err.is_credentials() => return Err(err),
            Err(err) => {
                warn!(%err, "token refresh failed, trying stored access token");
                None
            }
        };
        let access_token = refreshed
            .as_ref()
            .and_then(|c| c.access_token.clone())
            .or_else(|| credentials.access_token.clone())
            .ok_or_else(|| CoreError::CredentialsInvalid("no access token available".into()))?;

        let len = tokio::fs::metadata(&artifact.path).await?.len();
        let resource = build_video_resource(metadata, visibility, publish_at, &self.category_id);
        let session = self
            .start_resumable_upload(&access_token, &resource, len)
            .await?;
        let remote_id = self
            .send_video(&access_token, session, &artifact.path, len)
            .await?;
        info!(%remote_id, "video uploaded");

        if let Some(cover) = &artifact.cover_image {
            if let Err(err) = self.set_thumbnail(&access_token, &remote_id, cover).await {
                warn!(%remote_id, %err, "thumbnail upload failed");
            }
        }

        Ok(UploadReceipt {
            url: watch_url(&remote_id),
            remote_id,
            refreshed,
        })
    }

    async fn refresh_credentials(&self, refresh_token: &str) -> Result<Credentials> {
        let res = self
            .http
            .post(self.token_url.clone())
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(transport)?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }
        let token: TokenResponse = res
            .json()
            .await
            .map_err(|e| CoreError::Publication(format!("invalid token response: {e}")))?;
        Ok(Credentials {
            access_token: Some(token.access_token),
            refresh_token: token.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        })
    }
}

/// Credential problems are surfaced as [`CoreError::CredentialsInvalid`] so the
/// caller can ask for re-authorisation; everything else is a plain failure.
pub fn classify_failure(status: StatusCode, body: &str) -> CoreError {
    if status == StatusCode::UNAUTHORIZED
        || body.contains("invalid_grant")
        || body.contains("Invalid Credentials")
    {
        CoreError::CredentialsInvalid(format!("{status}: {body}"))
    } else {
        CoreError::Publication(format!("{status}: {body}"))
    }
}

/// `videos.insert` resource. A scheduled video must be private until `publishAt`.
pub fn build_video_resource(
    metadata: &VideoMetadata,
    visibility: Visibility,
    publish_at: Option<DateTime<Utc>>,
    category_id: &str,
) -> Value {
    let mut status = json!({
        "privacyStatus": visibility.as_str(),
        "selfDeclaredMadeForKids": false,
    });
    if let Some(at) = publish_at {
        status["privacyStatus"] = json!(Visibility::Private.as_str());
        status["publishAt"] = json!(at.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    json!({
        "snippet": {
            "title": metadata.title,
            "description": metadata.description,
            "tags": metadata.tags,
            "categoryId": category_id,
        },
        "status": status,
    })
}

pub fn watch_url(video_id: &str) -> String {
    format!("{WATCH_URL}{video_id}")
}

fn image_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}
