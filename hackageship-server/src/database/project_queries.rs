use crate::database::{
    entity::{self, prelude::*},
    AlreadyExistsError, DatabaseError, DbResult, NotFoundError, StateDatabase,
};
use async_trait::async_trait;
use sea_orm::{entity::*, query::*, InsertResult, PaginatorTrait};
use tracing::info;
use tracing_attributes::instrument;

pub mod models {
    use crate::database::entity;
    use derivative::Derivative;

    #[derive(Derivative, Clone, PartialEq, Eq)]
    #[derivative(Debug)]
    pub struct DbProjectModel {
        pub project_id: i32,
        pub host_user: String,
        pub host_project: String,
        #[derivative(Debug = "ignore")]
        pub hook_secret: String,
        pub activated: bool,
        pub created_at: chrono::DateTime<chrono::Utc>,
    }

    impl From<entity::project::Model> for DbProjectModel {
        fn from(source: entity::project::Model) -> Self {
            (&source).into()
        }
    }

    impl From<&entity::project::Model> for DbProjectModel {
        fn from(source: &entity::project::Model) -> Self {
            Self {
                project_id: source.id,
                host_user: source.host_user.clone(),
                host_project: source.host_project.clone(),
                hook_secret: source.hook_secret.clone(),
                activated: source.activated,
                created_at: chrono::DateTime::from_naive_utc_and_offset(
                    source.created_at,
                    chrono::Utc,
                ),
            }
        }
    }

    #[derive(Debug)]
    pub struct ProjectParam<'a> {
        pub host_user: &'a str,
        pub host_project: &'a str,
    }

    impl<'a> ProjectParam<'a> {
        pub fn new(user: &'a str, project: &'a str) -> Self {
            Self {
                host_user: user,
                host_project: project,
            }
        }
    }

    #[derive(Derivative)]
    #[derivative(Debug)]
    pub struct CreateProjectParam {
        #[derivative(Debug = "ignore")]
        pub hook_secret: String,
        pub activated: bool,
    }
}

pub use models::*;

/**
 * ProjectQueries is the registry half of the state database: the set of
 * (host user, host project) pairs that may trigger a release, each with
 * its own hook secret.
 *
 * Registrations are never deleted, the activation flag is the only thing
 * that changes after creation.
 */
#[async_trait]
pub trait ProjectQueries {
    async fn create_project(
        &self,
        project: &ProjectParam<'_>,
        create_params: CreateProjectParam,
    ) -> DbResult<DbProjectModel>;

    async fn find_project(&self, project: &ProjectParam<'_>) -> DbResult<DbProjectModel>;

    async fn sql_get_raw_project(
        &self,
        project: &ProjectParam<'_>,
    ) -> DbResult<Option<entity::project::Model>>;

    async fn get_project_by_id(&self, project_id: i32) -> DbResult<DbProjectModel>;

    async fn list_projects(&self) -> DbResult<Vec<DbProjectModel>>;

    async fn count_projects(&self) -> DbResult<u64>;

    async fn set_project_activation(
        &self,
        project: &ProjectParam<'_>,
        activated: bool,
    ) -> DbResult<DbProjectModel>;
}

#[async_trait]
impl ProjectQueries for StateDatabase {
    #[instrument(skip(self, create_params))]
    async fn create_project(
        &self,
        project_param: &ProjectParam<'_>,
        create_params: CreateProjectParam,
    ) -> DbResult<DbProjectModel> {
        use entity::project;

        if let Some(found) = self.sql_get_raw_project(project_param).await? {
            info!(
                project_id = found.id,
                "Found existing project for {}/{}.",
                project_param.host_user,
                project_param.host_project
            );
            return Err(DatabaseError::AlreadyExists {
                error: AlreadyExistsError::Project {
                    user: project_param.host_user.to_owned(),
                    project: project_param.host_project.to_owned(),
                },
            });
        }

        let model = project::ActiveModel {
            host_user: Set(project_param.host_user.to_owned()),
            host_project: Set(project_param.host_project.to_owned()),
            hook_secret: Set(create_params.hook_secret),
            activated: Set(create_params.activated),
            created_at: Set(self.date_time_provider.now().naive_utc()),
            ..Default::default()
        };

        let res: InsertResult<project::ActiveModel> =
            Project::insert(model).exec(&self.db).await?;
        self.get_project_by_id(res.last_insert_id).await
    }

    #[instrument(skip(self))]
    async fn find_project(&self, project_param: &ProjectParam<'_>) -> DbResult<DbProjectModel> {
        match self.sql_get_raw_project(project_param).await? {
            Some(found) => Ok(found.into()),
            None => Err(DatabaseError::NotFound {
                error: NotFoundError::Project {
                    user: project_param.host_user.to_owned(),
                    project: project_param.host_project.to_owned(),
                },
            }),
        }
    }

    #[instrument(skip(self))]
    async fn sql_get_raw_project(
        &self,
        project_param: &ProjectParam<'_>,
    ) -> DbResult<Option<entity::project::Model>> {
        use entity::project::Column;

        let condition = Condition::all()
            .add(Column::HostUser.eq(project_param.host_user))
            .add(Column::HostProject.eq(project_param.host_project));

        Ok(Project::find().filter(condition).one(&self.db).await?)
    }

    #[instrument(skip(self))]
    async fn get_project_by_id(&self, project_id: i32) -> DbResult<DbProjectModel> {
        match Project::find_by_id(project_id).one(&self.db).await? {
            Some(found) => Ok(found.into()),
            None => Err(DatabaseError::NotFound {
                error: NotFoundError::ProjectById { project_id },
            }),
        }
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> DbResult<Vec<DbProjectModel>> {
        use entity::project::Column;

        let projects = Project::find()
            .order_by_asc(Column::HostUser)
            .order_by_asc(Column::HostProject)
            .all(&self.db)
            .await?;

        Ok(projects.iter().map(DbProjectModel::from).collect())
    }

    #[instrument(skip(self))]
    async fn count_projects(&self) -> DbResult<u64> {
        Ok(Project::find().count(&self.db).await?)
    }

    #[instrument(skip(self))]
    async fn set_project_activation(
        &self,
        project_param: &ProjectParam<'_>,
        activated: bool,
    ) -> DbResult<DbProjectModel> {
        let found = match self.sql_get_raw_project(project_param).await? {
            Some(found) => found,
            None => {
                return Err(DatabaseError::NotFound {
                    error: NotFoundError::Project {
                        user: project_param.host_user.to_owned(),
                        project: project_param.host_project.to_owned(),
                    },
                })
            }
        };

        let mut model: entity::project::ActiveModel = found.into();
        model.activated = Set(activated);
        let updated = model.update(&self.db).await?;

        Ok(updated.into())
    }
}
