mod entity;

mod history_queries;
mod project_queries;

use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Schema};
use thiserror::Error;
use tracing::info;

pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Error, Debug)]
pub enum NotFoundError {
    #[error("Project {user}/{project} not found")]
    Project { user: String, project: String },
    #[error("Project with id {project_id} not found")]
    ProjectById { project_id: i32 },
    #[error("History entry with id {entry_id} not found")]
    HistoryById { entry_id: i32 },
}

#[derive(Error, Debug)]
pub enum AlreadyExistsError {
    #[error("Project {user}/{project} exists")]
    Project { user: String, project: String },
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    NotFound { error: NotFoundError },
    #[error(transparent)]
    AlreadyExists { error: AlreadyExistsError },
    #[error(transparent)]
    SeaOrmError {
        #[from]
        source: sea_orm::DbErr,
    },
}

#[derive(Clone, Debug)]
pub enum DateTimeProvider {
    RealDateTime,
}

impl DateTimeProvider {
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

#[derive(Debug)]
pub struct StateDatabase {
    pub db: DatabaseConnection,
    pub date_time_provider: DateTimeProvider,
}

impl StateDatabase {
    pub async fn new<S: Into<String>>(connection_url: S) -> DbResult<Self> {
        use std::time::Duration;

        let mut opts: ConnectOptions = ConnectOptions::new(connection_url.into());
        // SQLite allows a single writer; one pooled connection also keeps
        // `sqlite::memory:` pointing at a single database.
        opts.max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5));
        opts.sqlx_logging(cfg!(debug_assertions));
        let db: DatabaseConnection = Database::connect(opts).await?;

        Ok(Self {
            db,
            date_time_provider: DateTimeProvider::RealDateTime,
        })
    }

    /// Connects and makes sure both tables exist.
    pub async fn open<S: Into<String>>(connection_url: S) -> DbResult<Self> {
        let database = Self::new(connection_url).await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Creates the `project` and `publish_history` tables, and the unique
    /// index on the project's host pair, when they are missing.
    pub async fn migrate(&self) -> DbResult<()> {
        use entity::{project, publish_history};

        let backend = self.db.get_database_backend();
        let schema = Schema::new(DbBackend::Sqlite);

        let mut create_project = schema.create_table_from_entity(prelude::Project);
        create_project.if_not_exists();
        self.db.execute(backend.build(&create_project)).await?;

        let mut create_history = schema.create_table_from_entity(prelude::PublishHistory);
        create_history.if_not_exists();
        self.db.execute(backend.build(&create_history)).await?;

        let host_pair_index = Index::create()
            .name("idx_project_host_pair")
            .table(project::Entity)
            .col(project::Column::HostUser)
            .col(project::Column::HostProject)
            .unique()
            .if_not_exists()
            .to_owned();
        self.db.execute(backend.build(&host_pair_index)).await?;

        let repository_index = Index::create()
            .name("idx_publish_history_repository")
            .table(publish_history::Entity)
            .col(publish_history::Column::Repository)
            .if_not_exists()
            .to_owned();
        self.db.execute(backend.build(&repository_index)).await?;

        info!("State database schema is up to date");
        Ok(())
    }
}

pub mod prelude {
    pub use super::entity::prelude::*;
    pub use super::history_queries::{models::*, HistoryQueries};
    pub use super::project_queries::{models::*, ProjectQueries};
    pub use super::DbResult;
    pub use super::{
        AlreadyExistsError, DatabaseError, DateTimeProvider, NotFoundError, StateDatabase,
    };
}
