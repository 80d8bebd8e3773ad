//! Coverage service upload.
//!
//! Reads the aggregated LCOV file, converts it to the service's job document
//! and posts it as the multipart field `json_file`. Callers treat every error
//! from here as a warning: the local report is the source of truth.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use kiln_core::UploadConfig;

use crate::error::{CoverageError, UploadError};
use crate::lcov::{self, LcovRecord};

/// Ships an LCOV report somewhere.
#[async_trait]
pub trait CoverageUploader: Send + Sync {
    async fn upload(&self, lcov_path: &Path) -> Result<UploadReceipt, UploadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: u16,
    pub message: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobDocument {
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_token: Option<String>,
    pub source_files: Vec<SourceFile>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub source_digest: String,
    /// One slot per source line; `None` for lines without statements.
    pub coverage: Vec<Option<u64>>,
    /// Flattened `[line, block, branch, hits]` quadruples.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    message: Option<String>,
    url: Option<String>,
}

/// Client for a Coveralls-compatible jobs endpoint.
pub struct CoverallsClient {
    config: UploadConfig,
    root: PathBuf,
    http_client: reqwest::Client,
}

impl CoverallsClient {
    /// `root` is the project root; source paths are reported relative to it.
    pub fn new(config: UploadConfig, root: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            config,
            root: root.into(),
            http_client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Build the job document for `records`.
    pub fn build_job(&self, records: &[LcovRecord]) -> JobDocument {
        JobDocument {
            service_name: self.config.service_name.clone(),
            service_job_id: self.config.service_job_id.clone(),
            repo_token: self.config.repo_token.clone(),
            source_files: records.iter().map(|r| self.source_file(r)).collect(),
        }
    }

    fn source_file(&self, record: &LcovRecord) -> SourceFile {
        let path = Path::new(&record.source_file);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let name = absolute
            .strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| record.source_file.clone());

        let source = std::fs::read(&absolute).ok();
        let source_lines = source
            .as_ref()
            .map(|s| String::from_utf8_lossy(s).lines().count())
            .unwrap_or(0);
        let source_digest = hex::encode(Sha256::digest(source.as_deref().unwrap_or_default()));

        let max_line = record.lines.keys().next_back().copied().unwrap_or(0) as usize;
        let mut coverage = vec![None; source_lines.max(max_line)];
        for (line, hits) in &record.lines {
            if *line > 0 {
                coverage[*line as usize - 1] = Some(*hits);
            }
        }

        let branches = record
            .branches
            .iter()
            .flat_map(|b| {
                [
                    b.line as u64,
                    b.block as u64,
                    b.branch as u64,
                    b.taken.unwrap_or(0),
                ]
            })
            .collect();

        SourceFile {
            name,
            source_digest,
            coverage,
            branches,
        }
    }
}

#[async_trait]
impl CoverageUploader for CoverallsClient {
    async fn upload(&self, lcov_path: &Path) -> Result<UploadReceipt, UploadError> {
        if self.config.repo_token.is_none() && self.config.service_job_id.is_none() {
            return Err(UploadError::NotConfigured(
                "set COVERALLS_REPO_TOKEN or COVERALLS_SERVICE_JOB_ID".to_string(),
            ));
        }

        let text = tokio::fs::read_to_string(lcov_path)
            .await
            .map_err(CoverageError::io("read", lcov_path))?;
        let records = lcov::parse(&text)?;
        let job = self.build_job(&records);
        let body = serde_json::to_vec(&job).map_err(CoverageError::from)?;
        debug!(files = job.source_files.len(), bytes = body.len(), "Uploading coverage");

        let part = Part::bytes(body)
            .file_name("coverage.json")
            .mime_str("application/json")?;
        let form = Form::new().part("json_file", part);

        let response = self
            .http_client
            .post(&self.config.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: Option<ServiceResponse> = serde_json::from_str(&text).ok();
        let receipt = UploadReceipt {
            status: status.as_u16(),
            message: parsed.as_ref().and_then(|r| r.message.clone()),
            url: parsed.and_then(|r| r.url),
        };
        info!(status = receipt.status, url = ?receipt.url, "Coverage uploaded");
        Ok(receipt)
    }
}
