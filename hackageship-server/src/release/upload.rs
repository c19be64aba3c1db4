use async_trait::async_trait;
use derivative::Derivative;
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tracing_attributes::instrument;

/// Longest slice of the index's response body kept in an error message.
const MAX_BODY_IN_ERROR: usize = 500;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Upload request failed: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },
    #[error("Upload failed! Status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Fixed account used for every upload.
#[derive(Derivative, Clone, PartialEq, Eq)]
#[derivative(Debug)]
pub struct IndexCredentials {
    pub user: String,
    #[derivative(Debug = "ignore")]
    pub password: String,
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, archive: &Path) -> Result<(), UploadError>;
}

#[derive(Debug, Clone)]
pub struct HackageUploader {
    client: reqwest::Client,
    upload_url: String,
    credentials: IndexCredentials,
}

impl HackageUploader {
    pub fn new(
        index_url: &str,
        credentials: IndexCredentials,
        timeout: Option<Duration>,
    ) -> Result<Self, UploadError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            upload_url: format!("{}/packages/", index_url.trim_end_matches('/')),
            credentials,
        })
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }
}

#[async_trait]
impl Uploader for HackageUploader {
    #[instrument(skip(self, archive), fields(archive = %archive.display(), url = %self.upload_url))]
    async fn upload(&self, archive: &Path) -> Result<(), UploadError> {
        let contents = tokio::fs::read(archive)
            .await
            .map_err(|source| UploadError::Read {
                path: archive.to_owned(),
                source,
            })?;
        let file_name = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package.tar.gz".to_owned());

        let part = Part::bytes(contents)
            .file_name(file_name)
            .mime_str("application/x-tar")?;
        let form = Form::new().part("package", part);

        let response = self
            .client
            .post(&self.upload_url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(status = status.as_u16(), "Upload accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body = body.trim();
        let body = match body.char_indices().nth(MAX_BODY_IN_ERROR) {
            Some((cut, _)) => &body[..cut],
            None => body,
        };
        Err(UploadError::Rejected {
            status: status.as_u16(),
            body: body.to_owned(),
        })
    }
}
