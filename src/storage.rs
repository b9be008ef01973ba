use std::path::Path;

use async_trait::async_trait;
use reqwest::{header::CONTENT_RANGE, multipart, Client};
use serde::Deserialize;
use thiserror::Error;
use tokio::{fs::File, io::AsyncReadExt};
use tracing::{debug, info};

/// Files at or above this many bytes go through an upload session.
pub const CHUNKED_UPLOAD_THRESHOLD: u64 = 20 * 1024 * 1024;

const API_BASE: &str = "https://api.box.com";
const UPLOAD_BASE: &str = "https://upload.box.com/api";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("storage request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("storage api returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("upload of '{0}' returned no file entry")]
    EmptyUploadResponse(String),

    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

/// How to authenticate against the storage service.
#[derive(Debug)]
pub enum StorageAuth {
    /// Short-lived token pasted out of the developer console.
    DeveloperToken(String),
    /// Client credentials grant scoped to an enterprise.
    ClientCredentials {
        client_id: String,
        client_secret: String,
        enterprise_id: String,
    },
}

impl StorageAuth {
    /// Builds the auth config from the optional credential inputs, preferring
    /// the developer token when one is present. Unset and empty values both
    /// count as missing.
    pub fn from_credentials(
        dev_token: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
        enterprise_id: Option<String>,
    ) -> Result<Self, StorageError> {
        let present = |value: Option<String>| value.filter(|v| !v.is_empty());

        if let Some(token) = present(dev_token) {
            return Ok(StorageAuth::DeveloperToken(token));
        }
        Ok(StorageAuth::ClientCredentials {
            client_id: present(client_id)
                .ok_or(StorageError::MissingCredential("BOX_CLIENT_ID"))?,
            client_secret: present(client_secret)
                .ok_or(StorageError::MissingCredential("BOX_CLIENT_SECRET"))?,
            enterprise_id: present(enterprise_id)
                .ok_or(StorageError::MissingCredential("BOX_ENTERPRISE_ID"))?,
        })
    }
}

/// One uploaded file as reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    entries: Vec<UploadedFile>,
}

/// One item of a folder listing.
#[derive(Debug, Deserialize)]
pub struct FolderItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct FolderItemsEnvelope {
    entries: Vec<FolderItem>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UploadSession {
    id: String,
    part_size: u64,
}

/// A recorded part is echoed back verbatim at commit time, so the inner
/// object is kept opaque.
#[derive(Debug, Deserialize)]
struct UploadedPartEnvelope {
    part: serde_json::Value,
}

/// Upload strategy for one file, picked from its size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    SingleRequest,
    Chunked,
}

impl UploadStrategy {
    pub fn for_size(size: u64) -> Self {
        if size < CHUNKED_UPLOAD_THRESHOLD {
            UploadStrategy::SingleRequest
        } else {
            UploadStrategy::Chunked
        }
    }
}

/// Remote name for a local file: the override when given, else the base name.
pub fn remote_name(path: &Path, override_name: Option<&str>) -> String {
    match override_name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// The upload seam the bulk traversal drives.
#[async_trait]
pub trait UploadSink {
    /// Uploads one local file, naming it `name` inside `folder_id`.
    async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        folder_id: &str,
    ) -> Result<UploadedFile, StorageError>;
}

/// Authenticated storage client. Read-only after construction.
pub struct StorageClient {
    http: Client,
    token: String,
}

impl StorageClient {
    /// Authenticates once and returns a ready client. An auth failure is
    /// fatal; there is no anonymous fallback.
    pub async fn authenticate(auth: StorageAuth) -> Result<Self, StorageError> {
        let http = Client::new();
        let token = match auth {
            StorageAuth::DeveloperToken(token) => token,
            StorageAuth::ClientCredentials {
                client_id,
                client_secret,
                enterprise_id,
            } => {
                let params = [
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("box_subject_type", "enterprise"),
                    ("box_subject_id", enterprise_id.as_str()),
                ];
                let response = http
                    .post(format!("{API_BASE}/oauth2/token"))
                    .form(&params)
                    .send()
                    .await?;
                let token: TokenResponse = check_status(response).await?.json().await?;
                token.access_token
            }
        };
        info!("Authenticated with the storage service");
        Ok(StorageClient { http, token })
    }

    /// Lists the items directly inside a folder. Folder `0` is the root.
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<FolderItem>, StorageError> {
        let response = self
            .http
            .get(format!("{API_BASE}/2.0/folders/{folder_id}/items"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let envelope: FolderItemsEnvelope = check_status(response).await?.json().await?;
        Ok(envelope.entries)
    }

    /// Uploads a file below the session threshold in one multipart request.
    async fn upload_single(
        &self,
        path: &Path,
        name: &str,
        folder_id: &str,
    ) -> Result<UploadedFile, StorageError> {
        let data = tokio::fs::read(path).await?;
        let attributes = serde_json::json!({
            "name": name,
            "parent": { "id": folder_id },
        });
        let form = multipart::Form::new()
            .text("attributes", attributes.to_string())
            .part(
                "file",
                multipart::Part::bytes(data).file_name(name.to_string()),
            );
        let response = self
            .http
            .post(format!("{UPLOAD_BASE}/2.0/files/content"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        let envelope: FileEnvelope = check_status(response).await?.json().await?;
        envelope
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::EmptyUploadResponse(name.to_string()))
    }

    /// Uploads a large file through an upload session: create the session,
    /// send sequential parts of the session-assigned size, then commit.
    async fn upload_chunked(
        &self,
        path: &Path,
        name: &str,
        size: u64,
        folder_id: &str,
    ) -> Result<UploadedFile, StorageError> {
        let body = serde_json::json!({
            "folder_id": folder_id,
            "file_name": name,
            "file_size": size,
        });
        let response = self
            .http
            .post(format!("{UPLOAD_BASE}/2.0/files/upload_sessions"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let session: UploadSession = check_status(response).await?.json().await?;
        debug!(
            "Opened upload session {} with part size {}",
            session.id, session.part_size
        );

        let mut file = File::open(path).await?;
        let mut parts = Vec::new();
        let mut offset = 0u64;
        while offset < size {
            let part_len = session.part_size.min(size - offset) as usize;
            let mut buf = vec![0u8; part_len];
            file.read_exact(&mut buf).await?;

            let range = format!("bytes {}-{}/{}", offset, offset + part_len as u64 - 1, size);
            let response = self
                .http
                .put(format!(
                    "{UPLOAD_BASE}/2.0/files/upload_sessions/{}",
                    session.id
                ))
                .bearer_auth(&self.token)
                .header(CONTENT_RANGE, range)
                .body(buf)
                .send()
                .await?;
            let uploaded: UploadedPartEnvelope = check_status(response).await?.json().await?;
            parts.push(uploaded.part);
            offset += part_len as u64;
        }

        let response = self
            .http
            .post(format!(
                "{UPLOAD_BASE}/2.0/files/upload_sessions/{}/commit",
                session.id
            ))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "parts": parts }))
            .send()
            .await?;
        let envelope: FileEnvelope = check_status(response).await?.json().await?;
        envelope
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::EmptyUploadResponse(name.to_string()))
    }
}

#[async_trait]
impl UploadSink for StorageClient {
    /// Routes between the single-request and chunked paths by file size.
    /// Strictly-less-than the threshold stays single-request, so a file of
    /// exactly the threshold size goes chunked.
    async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        folder_id: &str,
    ) -> Result<UploadedFile, StorageError> {
        let size = tokio::fs::metadata(path).await?.len();
        match UploadStrategy::for_size(size) {
            UploadStrategy::SingleRequest => {
                info!(
                    "Uploading {} ({} bytes) in a single request",
                    path.display(),
                    size
                );
                self.upload_single(path, name, folder_id).await
            }
            UploadStrategy::Chunked => {
                info!("Uploading {} ({} bytes) in chunks", path.display(), size);
                self.upload_chunked(path, name, size, folder_id).await
            }
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Api { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn sizes_below_the_threshold_route_single_request() {
        assert_eq!(UploadStrategy::for_size(0), UploadStrategy::SingleRequest);
        assert_eq!(
            UploadStrategy::for_size(CHUNKED_UPLOAD_THRESHOLD - 1),
            UploadStrategy::SingleRequest
        );
    }

    #[test]
    fn sizes_at_or_above_the_threshold_route_chunked() {
        assert_eq!(
            UploadStrategy::for_size(CHUNKED_UPLOAD_THRESHOLD),
            UploadStrategy::Chunked
        );
        assert_eq!(
            UploadStrategy::for_size(CHUNKED_UPLOAD_THRESHOLD + 1),
            UploadStrategy::Chunked
        );
    }

    #[test]
    fn remote_name_defaults_to_the_base_name() {
        let path = Path::new("/tmp/clips/GX010001.MP4");
        assert_eq!(remote_name(path, None), "GX010001.MP4");
        assert_eq!(remote_name(path, Some("renamed.mp4")), "renamed.mp4");
    }

    #[test]
    fn a_dev_token_short_circuits_the_ccg_triple() {
        let auth = StorageAuth::from_credentials(Some("token".into()), None, None, None)
            .expect("dev token alone is enough");
        assert!(matches!(auth, StorageAuth::DeveloperToken(t) if t == "token"));
    }

    #[test]
    fn ccg_requires_every_credential() {
        let err = StorageAuth::from_credentials(None, Some("id".into()), None, Some("eid".into()))
            .expect_err("secret is missing");
        assert!(matches!(
            err,
            StorageError::MissingCredential("BOX_CLIENT_SECRET")
        ));

        assert!(StorageAuth::from_credentials(
            None,
            Some("id".into()),
            Some("secret".into()),
            Some("eid".into()),
        )
        .is_ok());
    }

    #[test]
    fn empty_credential_values_count_as_missing() {
        let err = StorageAuth::from_credentials(
            None,
            Some(String::new()),
            Some("secret".into()),
            Some("eid".into()),
        )
        .expect_err("empty id");
        assert!(matches!(
            err,
            StorageError::MissingCredential("BOX_CLIENT_ID")
        ));
    }
}
