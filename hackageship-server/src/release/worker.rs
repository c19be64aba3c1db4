use super::manifest::{locate_manifest, read_manifest, ManifestError};
use super::models::ReleaseJob;
use super::queue::ReleaseReceiver;
use super::toolchain::{CommandError, Toolchain};
use super::upload::{UploadError, Uploader};
use crate::database::prelude::CreateHistoryParam;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_attributes::instrument;

/// Recorded as name and version when nothing is known about the package.
pub const UNKNOWN: &str = "unknown";
/// Recorded as name and version when the manifest could not be read.
pub const UNREADABLE: &str = "-error-";
pub const SUCCESS_MESSAGE: &str = "All good!";

const WORKSPACE_PREFIX: &str = "hstmp_";

#[derive(Error, Debug)]
pub enum ReleaseFailure {
    #[error("Failed to create a working directory: {source}")]
    Workspace { source: io::Error },
    #[error("Something went wrong while trying to clone {clone_url}: {source}")]
    Clone {
        clone_url: String,
        source: CommandError,
    },
    #[error("Failed to list the cloned repository: {source}")]
    Listing { source: io::Error },
    #[error("Cabal file not found")]
    ManifestNotFound,
    #[error(transparent)]
    ManifestUnreadable {
        #[from]
        source: ManifestError,
    },
    #[error(
        "Your cabal file says your package is version {declared} but your git tag specifies version {tag}"
    )]
    VersionMismatch { declared: String, tag: String },
    #[error("Failed to checkout the provided tag {tag}: {source}")]
    Checkout { tag: String, source: CommandError },
    #[error("Failed to run cabal sdist: {source}")]
    Build { source: CommandError },
    #[error("Failed to generate package: {expected}")]
    ArtifactMissing { expected: String },
    #[error(transparent)]
    Upload {
        #[from]
        source: UploadError,
    },
}

/// Name and version as far as the pipeline has learned them.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PackageIdentity {
    name: String,
    version: String,
}

impl PackageIdentity {
    fn unknown() -> Self {
        Self {
            name: UNKNOWN.to_owned(),
            version: UNKNOWN.to_owned(),
        }
    }

    fn unreadable() -> Self {
        Self {
            name: UNREADABLE.to_owned(),
            version: UNREADABLE.to_owned(),
        }
    }

    fn archive_name(&self) -> String {
        format!("{}-{}.tar.gz", self.name, self.version)
    }
}

/// Drains the release queue one job at a time. Each job gets a fresh
/// workspace under `work_root` that is removed before the next job starts.
pub struct ReleaseWorker {
    backend: crate::Backend,
    toolchain: Arc<dyn Toolchain>,
    uploader: Arc<dyn Uploader>,
    work_root: PathBuf,
}

impl ReleaseWorker {
    pub fn new(
        backend: crate::Backend,
        toolchain: Arc<dyn Toolchain>,
        uploader: Arc<dyn Uploader>,
        work_root: PathBuf,
    ) -> Self {
        Self {
            backend,
            toolchain,
            uploader,
            work_root,
        }
    }

    pub fn spawn(self, receiver: ReleaseReceiver) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    pub async fn run(self, mut receiver: ReleaseReceiver) {
        info!(work_root = %self.work_root.display(), "Release worker started");

        while let Some(job) = receiver.next_job().await {
            crate::api::metrics::set_queue_depth(self.backend.queue_depth());
            self.handle_release(job).await;
        }

        info!("Release queue closed, release worker stopping");
    }

    /// Removes workspaces left behind by a previous process that died mid-job.
    pub async fn purge_stale_workspaces(&self) -> io::Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.work_root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let is_workspace = entry
                .file_name()
                .to_string_lossy()
                .starts_with(WORKSPACE_PREFIX);
            if !is_workspace || !entry.file_type().await?.is_dir() {
                continue;
            }

            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove {} Error: {}", entry.path().display(), e),
            }
        }

        Ok(removed)
    }

    /// Runs the whole pipeline for one job and records the outcome. Returns
    /// the recorded entry, or `None` for refs that are not tags.
    #[instrument(
        name = "release",
        skip(self, job),
        fields(repository = %job.repository_name, tag = %job.tag_ref)
    )]
    pub async fn handle_release(&self, job: ReleaseJob) -> Option<CreateHistoryParam> {
        if !job.is_tag() {
            debug!(ref_kind = ?job.ref_kind, "Skipping a ref that is not a tag");
            return None;
        }

        info!("new tag detected: {}", job.tag_ref);
        let mut identity = PackageIdentity::unknown();

        let result = match self.create_workspace() {
            Ok(workspace) => {
                let result = self.ship(&job, workspace.path(), &mut identity).await;
                remove_workspace(workspace).await;
                result
            }
            Err(source) => Err(ReleaseFailure::Workspace { source }),
        };

        let entry = match result {
            Ok(()) => {
                info!("{}", SUCCESS_MESSAGE);
                CreateHistoryParam {
                    repository: job.repository_name.clone(),
                    version: identity.version,
                    package_name: identity.name,
                    message: SUCCESS_MESSAGE.to_owned(),
                    publish_okay: true,
                }
            }
            Err(failure) => {
                warn!("Release failed: {}", failure);
                CreateHistoryParam {
                    repository: job.repository_name.clone(),
                    version: identity.version,
                    package_name: identity.name,
                    message: failure.to_string(),
                    publish_okay: false,
                }
            }
        };

        crate::api::metrics::track_release(entry.publish_okay);
        if let Err(e) = self.backend.record_release(entry.clone()).await {
            error!("Failed to record release outcome: {}", e);
        }

        Some(entry)
    }

    fn create_workspace(&self) -> io::Result<TempDir> {
        tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .rand_bytes(10)
            .tempdir_in(&self.work_root)
    }

    async fn ship(
        &self,
        job: &ReleaseJob,
        checkout: &Path,
        identity: &mut PackageIdentity,
    ) -> Result<(), ReleaseFailure> {
        self.toolchain
            .clone_repository(&job.clone_url, checkout)
            .await
            .map_err(|source| ReleaseFailure::Clone {
                clone_url: job.clone_url.clone(),
                source,
            })?;

        let manifest = locate_manifest(checkout)
            .await
            .map_err(|source| ReleaseFailure::Listing { source })?
            .ok_or(ReleaseFailure::ManifestNotFound)?;
        info!(".cabal file found: {}", manifest.display());

        let metadata = match read_manifest(&manifest).await {
            Ok(metadata) => metadata,
            Err(e) => {
                *identity = PackageIdentity::unreadable();
                return Err(e.into());
            }
        };
        if let Some(name) = &metadata.name {
            identity.name = name.clone();
        }
        if let Some(version) = &metadata.version {
            identity.version = version.clone();
        }
        info!("Package name is {}", identity.name);

        if metadata.version.as_deref() != Some(job.tag_ref.as_str()) {
            return Err(ReleaseFailure::VersionMismatch {
                declared: identity.version.clone(),
                tag: job.tag_ref.clone(),
            });
        }

        self.toolchain
            .checkout_tag(checkout, &job.tag_ref)
            .await
            .map_err(|source| ReleaseFailure::Checkout {
                tag: job.tag_ref.clone(),
                source,
            })?;

        self.toolchain
            .build_source_distribution(checkout)
            .await
            .map_err(|source| ReleaseFailure::Build { source })?;

        let archive = locate_artifact(checkout, identity).await?;
        info!("Generated {} for hackage, uploading...", archive.display());

        self.uploader.upload(&archive).await?;
        Ok(())
    }
}

/// `cabal sdist` writes to `dist/` in the v1 layout and to
/// `dist-newstyle/sdist/` in the v2 layout.
async fn locate_artifact(
    checkout: &Path,
    identity: &PackageIdentity,
) -> Result<PathBuf, ReleaseFailure> {
    let archive_name = identity.archive_name();
    let candidates = [
        PathBuf::from("dist").join(&archive_name),
        PathBuf::from("dist-newstyle").join("sdist").join(&archive_name),
    ];

    for candidate in &candidates {
        let path = checkout.join(candidate);
        if let Ok(metadata) = tokio::fs::metadata(&path).await {
            if metadata.is_file() {
                return Ok(path);
            }
        }
    }

    Err(ReleaseFailure::ArtifactMissing {
        expected: candidates[0].display().to_string(),
    })
}

async fn remove_workspace(workspace: TempDir) {
    let path = workspace.path().to_owned();
    match tokio::task::spawn_blocking(move || workspace.close()).await {
        Ok(Ok(())) => debug!("Removed {}", path.display()),
        Ok(Err(e)) => warn!("Failed to remove {} Error: {}", path.display(), e),
        Err(e) => warn!("Cleanup of {} did not finish: {}", path.display(), e),
    }
}
