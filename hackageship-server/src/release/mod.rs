mod manifest;
mod queue;
mod signature;
mod toolchain;
mod upload;
mod worker;

pub use queue::{release_queue, QueueClosed, ReleaseQueue, ReleaseReceiver};
pub use signature::{verify_signature, HookSignature, SignatureAlgorithm};
pub use toolchain::{CabalToolchain, CommandError, CommandRunner, Toolchain};
pub use upload::{HackageUploader, IndexCredentials, UploadError, Uploader};
pub use worker::ReleaseWorker;

pub use models::*;

pub mod models {
    use serde::Deserialize;
    use thiserror::Error;

    /// The GitHub event that announces a new branch or tag.
    pub const CREATE_EVENT: &str = "create";

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RefKind {
        Tag,
        Branch,
        #[serde(other)]
        Other,
    }

    /// One release request, created by the webhook and consumed exactly once
    /// by the worker.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ReleaseJob {
        pub repository_name: String,
        pub clone_url: String,
        pub tag_ref: String,
        pub ref_kind: RefKind,
    }

    #[derive(Debug, Deserialize)]
    struct CreateEventPayload {
        repository: RepositoryPayload,
        #[serde(rename = "ref", default)]
        git_ref: Option<String>,
        ref_type: RefKind,
    }

    #[derive(Debug, Deserialize)]
    struct RepositoryPayload {
        name: String,
        clone_url: String,
    }

    #[derive(Error, Debug)]
    pub enum PayloadError {
        #[error("Could not parse the json: {source}")]
        Json {
            #[from]
            source: serde_json::Error,
        },
        #[error("A tag was created but the payload names no ref")]
        MissingRef,
    }

    impl ReleaseJob {
        /// Builds a job from the body of a GitHub `create` event. Repository
        /// creation events carry no ref at all, those become `RefKind::Other`
        /// jobs with an empty ref.
        pub fn from_create_event(body: &[u8]) -> Result<Self, PayloadError> {
            let payload: CreateEventPayload = serde_json::from_slice(body)?;

            let tag_ref = match (payload.ref_type, payload.git_ref) {
                (_, Some(git_ref)) => git_ref,
                (RefKind::Tag, None) => return Err(PayloadError::MissingRef),
                (_, None) => String::new(),
            };

            Ok(Self {
                repository_name: payload.repository.name,
                clone_url: payload.repository.clone_url,
                tag_ref,
                ref_kind: payload.ref_type,
            })
        }

        pub fn is_tag(&self) -> bool {
            self.ref_kind == RefKind::Tag
        }
    }

}
