pub mod models;

use models::*;
use thiserror::Error;
use tracing::{info, warn};
use tracing_attributes::instrument;

use crate::database::prelude::*;
use crate::release::{
    verify_signature, HookSignature, PayloadError, QueueClosed, ReleaseJob, ReleaseQueue,
};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    DatabaseError {
        #[from]
        source: DatabaseError,
    },
    #[error("Requested action was not allowed because: {reason}")]
    ConstraintViolation { reason: ConstraintViolation },
}

#[derive(Error, Debug)]
pub enum ConstraintViolation {
    #[error("{field} '{value}' may only contain letters, digits, '.', '_' and '-'")]
    InvalidName { field: &'static str, value: String },
    #[error("A hook secret is required")]
    EmptySecret,
}

/// Why a webhook delivery was turned away. None of these ever reach the
/// release queue.
#[derive(Error, Debug)]
pub enum HookError {
    #[error("Unknown project {user}/{project}")]
    UnknownProject { user: String, project: String },
    #[error("Project {user}/{project} is not activated")]
    InactiveProject { user: String, project: String },
    #[error("Invalid Request Body!")]
    BadBody,
    #[error("Invalid X-Hub-Signature!")]
    BadSignature,
    #[error("Invalid create event: {source}")]
    BadPayload {
        #[from]
        source: PayloadError,
    },
    #[error(transparent)]
    QueueClosed {
        #[from]
        source: QueueClosed,
    },
    #[error(transparent)]
    Registry {
        #[from]
        source: DatabaseError,
    },
}

pub struct DefaultBackend {
    pub database: StateDatabase,
    pub release_queue: ReleaseQueue,
}

fn validate_name(field: &'static str, value: &str) -> Result<(), BackendError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(BackendError::ConstraintViolation {
            reason: ConstraintViolation::InvalidName {
                field,
                value: value.to_owned(),
            },
        })
    }
}

impl DefaultBackend {
    pub async fn new(database_url: &str, release_queue: ReleaseQueue) -> Result<Self, BackendError> {
        Ok(Self {
            database: StateDatabase::open(database_url).await?,
            release_queue,
        })
    }

    #[instrument(skip(self, hook_secret))]
    pub async fn register_project(
        &self,
        user: &str,
        project: &str,
        hook_secret: &str,
        activated: bool,
    ) -> Result<DataStoreProject, BackendError> {
        validate_name("User", user)?;
        validate_name("Project", project)?;
        if hook_secret.trim().is_empty() {
            return Err(BackendError::ConstraintViolation {
                reason: ConstraintViolation::EmptySecret,
            });
        }

        let created = self
            .database
            .create_project(
                &ProjectParam::new(user, project),
                CreateProjectParam {
                    hook_secret: hook_secret.to_owned(),
                    activated,
                },
            )
            .await?;

        info!(project_id = created.project_id, "Registered {}/{}", user, project);
        Ok(created.into())
    }

    #[instrument(skip(self))]
    pub async fn toggle_project(
        &self,
        user: &str,
        project: &str,
    ) -> Result<DataStoreProject, BackendError> {
        let param = ProjectParam::new(user, project);
        let found = self.database.find_project(&param).await?;
        let updated = self
            .database
            .set_project_activation(&param, !found.activated)
            .await?;

        info!(activated = updated.activated, "Toggled {}/{}", user, project);
        Ok(updated.into())
    }

    #[instrument(skip(self))]
    pub async fn list_projects(&self) -> Result<Vec<DataStoreProject>, BackendError> {
        let projects = self.database.list_projects().await?;
        Ok(projects.iter().map(DataStoreProject::from).collect())
    }

    #[instrument(skip(self, pagination))]
    pub async fn list_history(
        &self,
        pagination: PaginationOptions,
    ) -> Result<DataStoreHistoryList, BackendError> {
        let total = self.database.count_history(None).await?;
        let has_more = pagination.has_more(total);
        let entries = self.database.list_history(pagination).await?;
        Ok(DataStoreHistoryList::from(entries, total, has_more))
    }

    /// History entries only carry the repository name, so the user part of
    /// the pair only serves to check that the project is registered.
    #[instrument(skip(self, pagination))]
    pub async fn list_project_history(
        &self,
        user: &str,
        project: &str,
        pagination: PaginationOptions,
    ) -> Result<DataStoreHistoryList, BackendError> {
        self.database
            .find_project(&ProjectParam::new(user, project))
            .await?;

        let total = self.database.count_history(Some(project)).await?;
        let has_more = pagination.has_more(total);
        let entries = self
            .database
            .list_history_for_repository(project, pagination)
            .await?;
        Ok(DataStoreHistoryList::from(entries, total, has_more))
    }

    /// Resolves the registration a delivery is addressed to. Unknown and
    /// inactive projects are rejected here, before any secret is used.
    #[instrument(skip(self))]
    pub async fn find_hook_target(
        &self,
        user: &str,
        project: &str,
    ) -> Result<DbProjectModel, HookError> {
        let found = match self
            .database
            .sql_get_raw_project(&ProjectParam::new(user, project))
            .await?
        {
            Some(found) => DbProjectModel::from(found),
            None => {
                return Err(HookError::UnknownProject {
                    user: user.to_owned(),
                    project: project.to_owned(),
                })
            }
        };

        if !found.activated {
            return Err(HookError::InactiveProject {
                user: user.to_owned(),
                project: project.to_owned(),
            });
        }

        Ok(found)
    }

    pub fn authorize_hook(
        &self,
        target: &DbProjectModel,
        body: &[u8],
        signature: Option<&HookSignature>,
    ) -> Result<(), HookError> {
        let verified = match signature {
            Some(signature) => {
                verify_signature(body, signature, target.hook_secret.as_bytes())
            }
            None => false,
        };

        if verified {
            Ok(())
        } else {
            warn!(
                "Signature check failed for {}/{}",
                target.host_user, target.host_project
            );
            Err(HookError::BadSignature)
        }
    }

    /// Waits while the queue is full.
    #[instrument(skip(self, job), fields(repository = %job.repository_name, tag = %job.tag_ref))]
    pub async fn enqueue_release(&self, job: ReleaseJob) -> Result<(), HookError> {
        self.release_queue.enqueue(job).await?;
        crate::api::metrics::set_queue_depth(self.queue_depth());
        info!(pending = self.queue_depth(), "Release queued");
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.release_queue.pending()
    }

    #[instrument(skip(self, entry), fields(repository = %entry.repository, okay = entry.publish_okay))]
    pub async fn record_release(
        &self,
        entry: CreateHistoryParam,
    ) -> Result<DataStoreHistoryEntry, BackendError> {
        let recorded = self.database.record_history(entry).await?;
        Ok(recorded.into())
    }
}
