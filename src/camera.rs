use std::path::Path;

use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};

/// Wireless cameras answer on a fixed address once the wifi link is up.
pub const DEFAULT_CAMERA_URL: &str = "http://10.5.5.9:8080";

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("camera returned {status} for {endpoint}")]
    Api { status: u16, endpoint: String },

    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

/// The on-device media manifest: groups of files per DCIM directory.
#[derive(Debug, Deserialize)]
pub struct MediaList {
    pub media: Vec<MediaGroup>,
}

#[derive(Debug, Deserialize)]
pub struct MediaGroup {
    #[serde(rename = "d")]
    pub directory: String,
    #[serde(rename = "fs")]
    pub files: Vec<MediaFile>,
}

#[derive(Debug, Deserialize)]
pub struct MediaFile {
    #[serde(rename = "n")]
    pub name: String,
}

/// An open connection to the camera. Obtain one with [`CameraSession::open`]
/// and always hand it back to [`CameraSession::close`]; [`run_acquisition`]
/// wraps both around the whole flow.
pub struct CameraSession {
    http: Client,
    base_url: String,
}

impl CameraSession {
    /// Probes the camera and switches it into transfer mode.
    pub async fn open(base_url: &str) -> Result<Self, CameraError> {
        let session = CameraSession {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        };
        session.get_ok("/gopro/camera/state").await?;
        session.get_ok("/gopro/media/turbo_transfer?p=1").await?;
        info!("Connected to camera at {}", session.base_url);
        Ok(session)
    }

    /// Releases the session by switching transfer mode back off.
    pub async fn close(self) -> Result<(), CameraError> {
        self.get_ok("/gopro/media/turbo_transfer?p=0").await?;
        info!("Camera session released");
        Ok(())
    }

    /// Fetches the media manifest.
    pub async fn media_list(&self) -> Result<MediaList, CameraError> {
        Ok(self.get_ok("/gopro/media/list").await?.json().await?)
    }

    /// Streams one media file to `dest`.
    pub async fn download_file(
        &self,
        directory: &str,
        name: &str,
        dest: &Path,
    ) -> Result<(), CameraError> {
        let response = self
            .get_ok(&format!("/videos/DCIM/{directory}/{name}"))
            .await?;

        let mut out = fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        debug!("Wrote {} bytes to {}", written, dest.display());
        Ok(())
    }

    /// Erases every media file on the camera. Irreversible.
    pub async fn delete_all(&self) -> Result<(), CameraError> {
        self.get_ok("/gp/gpControl/command/storage/delete/all")
            .await?;
        Ok(())
    }

    async fn get_ok(&self, endpoint: &str) -> Result<reqwest::Response, CameraError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, endpoint))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CameraError::Api {
                status: response.status().as_u16(),
                endpoint: endpoint.to_string(),
            });
        }
        Ok(response)
    }
}

/// Downloads everything the camera holds into `staging`, then wipes the
/// camera. The session is released on every path, error or not; the first
/// flow error aborts the run once the release has happened.
pub async fn run_acquisition(base_url: &str, staging: &Path) -> Result<(), CameraError> {
    let session = CameraSession::open(base_url).await?;
    let outcome = acquire_media(&session, staging).await;
    let released = session.close().await;
    outcome?;
    released
}

async fn acquire_media(session: &CameraSession, staging: &Path) -> Result<(), CameraError> {
    fs::create_dir_all(staging).await?;

    let manifest = session.media_list().await?;
    for group in &manifest.media {
        for file in &group.files {
            let dest = staging.join(&file.name);
            info!(
                "Downloading {}/{} to {}",
                group.directory,
                file.name,
                dest.display()
            );
            session
                .download_file(&group.directory, &file.name, &dest)
                .await?;
        }
    }

    info!("Deleting all media on the camera");
    session.delete_all().await?;
    Ok(())
}
