//! GitHub contents API backend.
//!
//! The document lives as a file in a repository branch. The blob `sha` the
//! API returns with every read is the version marker, and every `PUT` carries
//! the sha it expects to replace, so GitHub itself rejects stale writes.
//!
//! | Status on PUT       | Meaning                             |
//! |---------------------|-------------------------------------|
//! | `200` / `201`       | written, new sha in `content.sha`   |
//! | `409` / `412`       | sha no longer current               |
//! | `422`               | sha missing or does not match       |
//! | anything else       | [`PondoError::StorageUnavailable`]  |

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{conflict, FundStore, Version, Versioned};
use crate::errors::{PondoError, Result};
use crate::funds::FundsDocument;

const USER_AGENT: &str = concat!("pondo/", env!("CARGO_PKG_VERSION"));
const COMMIT_MESSAGE: &str = "Update funds data";

/// Where the document lives on GitHub.
#[derive(Debug, Clone)]
pub struct GitHubLocation {
    pub api_url: String,
    /// `owner/name`
    pub repo: String,
    pub branch: String,
    pub path: String,
}

pub struct GitHubFundStore {
    client: Client,
    location: GitHubLocation,
    token: String,
}

// ─────────────────────────────────────────────────────────
// Contents API shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ContentsFile {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutResponseContent,
}

#[derive(Debug, Deserialize)]
struct PutResponseContent {
    sha: String,
}

impl GitHubFundStore {
    pub fn new(client: Client, location: GitHubLocation, token: String) -> Self {
        Self {
            client,
            location,
            token,
        }
    }

    fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.location.api_url, self.location.repo, self.location.path
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
    }

    async fn get_file(&self) -> Result<Option<ContentsFile>> {
        let resp = self
            .authorized(self.client.get(self.contents_url()))
            .query(&[("ref", self.location.branch.as_str())])
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let file: ContentsFile = resp.json().await.map_err(|e| {
                    PondoError::CorruptData(format!("unexpected contents API response: {e}"))
                })?;
                Ok(Some(file))
            }
            status => Err(PondoError::StorageUnavailable(format!(
                "GitHub GET {} returned {status}",
                self.location.path
            ))),
        }
    }
}

fn decode_content(file: &ContentsFile) -> Result<FundsDocument> {
    if let Some(encoding) = file.encoding.as_deref() {
        if encoding != "base64" {
            return Err(PondoError::CorruptData(format!(
                "unsupported content encoding {encoding:?}"
            )));
        }
    }
    // The API wraps base64 at 60 columns.
    let compact: String = file
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| PondoError::CorruptData(format!("invalid base64 content: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| PondoError::CorruptData(e.to_string()))
}

#[async_trait]
impl FundStore for GitHubFundStore {
    async fn fetch(&self) -> Result<Option<Versioned<FundsDocument>>> {
        let Some(file) = self.get_file().await? else {
            return Ok(None);
        };
        Ok(Some(Versioned {
            value: decode_content(&file)?,
            version: Version(file.sha),
        }))
    }

    async fn current_version(&self) -> Result<Option<Version>> {
        Ok(self.get_file().await?.map(|file| Version(file.sha)))
    }

    async fn put(&self, document: &FundsDocument, expected: Option<&Version>) -> Result<Version> {
        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| PondoError::CorruptData(e.to_string()))?;
        let body = PutContents {
            message: COMMIT_MESSAGE,
            content: STANDARD.encode(json),
            branch: &self.location.branch,
            sha: expected.map(Version::as_str),
        };

        let resp = self
            .authorized(self.client.put(self.contents_url()))
            .json(&body)
            .send()
            .await?;

        match resp.status() {
            status if status.is_success() => {
                let written: PutResponse = resp.json().await.map_err(|e| {
                    PondoError::StorageUnavailable(format!("unreadable PUT response: {e}"))
                })?;
                debug!("Committed {} at {}", self.location.path, written.content.sha);
                Ok(Version(written.content.sha))
            }
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED | StatusCode::UNPROCESSABLE_ENTITY => {
                warn!("GitHub rejected write to {} ({})", self.location.path, resp.status());
                let found = self.current_version().await.ok().flatten();
                Err(conflict(expected, found.as_ref()))
            }
            status => Err(PondoError::StorageUnavailable(format!(
                "GitHub PUT {} returned {status}",
                self.location.path
            ))),
        }
    }

    fn describe(&self) -> String {
        format!(
            "github {}@{}:{}",
            self.location.repo, self.location.branch, self.location.path
        )
    }
}
