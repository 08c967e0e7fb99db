//! External PDF extraction service.
//!
//! The pipeline only needs one capability from the service: turn a PDF on
//! disk into an extraction archive on disk. [`ExtractionService`] is that
//! seam; [`HttpExtractionService`] talks to a PDF-Services-style REST API:
//!
//! ```text
//! POST {base}/token                 client credentials → bearer token
//! POST {base}/assets                → { uploadUri, assetID }
//! PUT  uploadUri                    raw PDF bytes
//! POST {base}/operation/extractpdf  → 201, Location: <polling url>
//! GET  <polling url>                until status = done | failed
//! GET  resource.downloadUri         → ZIP archive
//! ```

use crate::config::ExtractionServiceConfig;
use crate::error::NotesError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Converts a PDF into an extraction archive.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Extract `pdf` and write the resulting ZIP archive to `archive_out`.
    async fn extract(
        &self,
        pdf: &Path,
        archive_out: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), NotesError>;
}

/// Request body of the extract operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractJobRequest {
    #[serde(rename = "assetID")]
    pub asset_id: String,
    pub elements_to_extract: Vec<String>,
    pub renditions_to_extract: Vec<String>,
}

impl ExtractJobRequest {
    /// Text and tables as structured elements; figures and tables as
    /// renditions.
    pub fn for_asset(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            elements_to_extract: vec!["text".into(), "tables".into()],
            renditions_to_extract: vec!["figures".into(), "tables".into()],
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetResponse {
    upload_uri: String,
    #[serde(rename = "assetID")]
    asset_id: String,
}

/// Body returned by the polling URL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobStatus {
    pub status: String,
    #[serde(default)]
    pub resource: Option<JobResource>,
    #[serde(default)]
    pub error: Option<JobFailure>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResource {
    pub download_uri: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobFailure {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// What one poll tells the client to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Done { download_uri: String },
    Failed(String),
}

impl JobStatus {
    pub fn outcome(&self) -> PollOutcome {
        match self.status.to_ascii_lowercase().as_str() {
            "done" => match &self.resource {
                Some(r) => PollOutcome::Done {
                    download_uri: r.download_uri.clone(),
                },
                None => PollOutcome::Failed("job finished without a result resource".into()),
            },
            "failed" => {
                let msg = self
                    .error
                    .as_ref()
                    .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
                    .unwrap_or_else(|| "extraction job failed".to_string());
                PollOutcome::Failed(msg)
            }
            _ => PollOutcome::Pending,
        }
    }
}

/// REST client for the extraction service.
pub struct HttpExtractionService {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl HttpExtractionService {
    /// # Errors
    /// [`NotesError::InvalidConfig`] when the base URL or credentials are
    /// missing.
    pub fn new(config: &ExtractionServiceConfig) -> Result<Self, NotesError> {
        let missing = |what: &str| {
            NotesError::InvalidConfig(format!(
                "extraction service {what} is not configured (set PDF_SERVICES_{})",
                what.to_ascii_uppercase().replace(' ', "_")
            ))
        };
        let base_url = config
            .base_url
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("base url"))?;
        let client_id = config
            .client_id
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("client id"))?;
        let client_secret = config
            .client_secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("client secret"))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| NotesError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn access_token(&self) -> Result<String, NotesError> {
        let response = self
            .client
            .post(format!("{}/token", self.base_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(extraction_err("token request"))?;
        let token: TokenResponse = checked(response, "token request")
            .await?
            .json()
            .await
            .map_err(extraction_err("token response"))?;
        Ok(token.access_token)
    }

    async fn upload(&self, token: &str, pdf: &Path) -> Result<String, NotesError> {
        let bytes = tokio::fs::read(pdf)
            .await
            .map_err(|e| NotesError::io(format!("Failed to read {}", pdf.display()), e))?;

        let response = self
            .client
            .post(format!("{}/assets", self.base_url))
            .bearer_auth(token)
            .header("x-api-key", &self.client_id)
            .json(&serde_json::json!({ "mediaType": "application/pdf" }))
            .send()
            .await
            .map_err(extraction_err("asset creation"))?;
        let asset: AssetResponse = checked(response, "asset creation")
            .await?
            .json()
            .await
            .map_err(extraction_err("asset response"))?;

        let response = self
            .client
            .put(&asset.upload_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(bytes)
            .send()
            .await
            .map_err(extraction_err("asset upload"))?;
        checked(response, "asset upload").await?;

        debug!("Uploaded {} as asset {}", pdf.display(), asset.asset_id);
        Ok(asset.asset_id)
    }

    async fn submit(&self, token: &str, asset_id: &str) -> Result<String, NotesError> {
        let response = self
            .client
            .post(format!("{}/operation/extractpdf", self.base_url))
            .bearer_auth(token)
            .header("x-api-key", &self.client_id)
            .json(&ExtractJobRequest::for_asset(asset_id))
            .send()
            .await
            .map_err(extraction_err("job submission"))?;
        let response = checked(response, "job submission").await?;
        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| NotesError::Extraction {
                detail: "job submission returned no polling location".into(),
            })
    }

    async fn poll(
        &self,
        token: &str,
        polling_url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, NotesError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let response = self
                .client
                .get(polling_url)
                .bearer_auth(token)
                .header("x-api-key", &self.client_id)
                .send()
                .await
                .map_err(extraction_err("job status"))?;
            let status: JobStatus = checked(response, "job status")
                .await?
                .json()
                .await
                .map_err(extraction_err("job status body"))?;

            match status.outcome() {
                PollOutcome::Done { download_uri } => return Ok(download_uri),
                PollOutcome::Failed(detail) => return Err(NotesError::Extraction { detail }),
                PollOutcome::Pending => {}
            }

            if Instant::now() >= deadline {
                return Err(NotesError::Extraction {
                    detail: format!("job did not finish within {}s", self.timeout.as_secs()),
                });
            }
            debug!("Extraction job '{}' still {}", polling_url, status.status);
            tokio::select! {
                _ = cancel.cancelled() => return Err(NotesError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn download(&self, uri: &str, archive_out: &Path) -> Result<u64, NotesError> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(extraction_err("archive download"))?;
        let bytes = checked(response, "archive download")
            .await?
            .bytes()
            .await
            .map_err(extraction_err("archive download"))?;
        tokio::fs::write(archive_out, &bytes)
            .await
            .map_err(|e| NotesError::io("Failed to write extraction archive", e))?;
        Ok(bytes.len() as u64)
    }
}

#[async_trait]
impl ExtractionService for HttpExtractionService {
    async fn extract(
        &self,
        pdf: &Path,
        archive_out: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), NotesError> {
        let start = Instant::now();
        let work = async {
            let token = self.access_token().await?;
            let asset_id = self.upload(&token, pdf).await?;
            let polling_url = self.submit(&token, &asset_id).await?;
            let download_uri = self.poll(&token, &polling_url, cancel).await?;
            self.download(&download_uri, archive_out).await
        };
        let size = tokio::select! {
            _ = cancel.cancelled() => return Err(NotesError::Cancelled),
            size = work => size?,
        };
        info!(
            "Extracted {} → {} bytes in {:?}",
            pdf.display(),
            size,
            start.elapsed()
        );
        Ok(())
    }
}

fn extraction_err(stage: &'static str) -> impl Fn(reqwest::Error) -> NotesError {
    move |e| NotesError::Extraction {
        detail: format!("{stage}: {e}"),
    }
}

/// Turn non-2xx responses into [`NotesError::Extraction`] with the body.
async fn checked(response: reqwest::Response, stage: &str) -> Result<reqwest::Response, NotesError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotesError::Extraction {
        detail: format!("{stage}: HTTP {status}: {}", body.chars().take(300).collect::<String>()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_request_wire_shape() {
        let body = serde_json::to_value(ExtractJobRequest::for_asset("urn:aaid:1")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "assetID": "urn:aaid:1",
                "elementsToExtract": ["text", "tables"],
                "renditionsToExtract": ["figures", "tables"]
            })
        );
    }

    #[test]
    fn poll_outcomes() {
        let pending: JobStatus = serde_json::from_str(r#"{"status":"in progress"}"#).unwrap();
        assert_eq!(pending.outcome(), PollOutcome::Pending);

        let done: JobStatus = serde_json::from_str(
            r#"{"status":"done","resource":{"downloadUri":"https://dl/x.zip"}}"#,
        )
        .unwrap();
        assert_eq!(
            done.outcome(),
            PollOutcome::Done {
                download_uri: "https://dl/x.zip".into()
            }
        );

        let failed: JobStatus = serde_json::from_str(
            r#"{"status":"failed","error":{"code":"BAD_PDF","message":"File is encrypted"}}"#,
        )
        .unwrap();
        assert_eq!(failed.outcome(), PollOutcome::Failed("File is encrypted".into()));

        let done_empty: JobStatus = serde_json::from_str(r#"{"status":"done"}"#).unwrap();
        assert!(matches!(done_empty.outcome(), PollOutcome::Failed(_)));
    }

    #[test]
    fn missing_credentials_are_config_errors() {
        let err = HttpExtractionService::new(&ExtractionServiceConfig::default()).err();
        assert!(matches!(err, Some(NotesError::InvalidConfig(_))));

        let config = ExtractionServiceConfig {
            base_url: Some("https://pdf.example.com/".into()),
            client_id: Some("id".into()),
            client_secret: None,
            ..Default::default()
        };
        let err = HttpExtractionService::new(&config).err().unwrap();
        assert!(err.to_string().contains("PDF_SERVICES_CLIENT_SECRET"));
    }

    #[test]
    fn base_url_is_trimmed() {
        let config = ExtractionServiceConfig {
            base_url: Some("https://pdf.example.com/".into()),
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            ..Default::default()
        };
        let svc = HttpExtractionService::new(&config).unwrap();
        assert_eq!(svc.base_url, "https://pdf.example.com");
    }
}
