use super::prelude::*;
use crate::backend::models::DataStoreProject;
use derivative::Derivative;
use serde::Deserialize;
use tracing::info;
use tracing_attributes::instrument;
use warp::{Filter, Rejection, Reply};

fn default_activated() -> bool {
    true
}

#[derive(Derivative, Deserialize)]
#[derivative(Debug)]
struct CreateProject {
    user: String,
    project: String,
    #[derivative(Debug = "ignore")]
    secret: String,
    #[serde(default = "default_activated")]
    activated: bool,
}

pub fn create_project_api(
    db: crate::Backend,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    list_projects(db.clone())
        .or(create_project(db.clone()))
        .or(toggle_project(db))
}

fn list_projects(
    db: crate::Backend,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    info!("GET /projects");
    warp::path!("projects")
        .and(warp::get())
        .and(with_db(db))
        .and_then(list_projects_impl)
}

#[instrument(name = "rest_project_list", skip(db))]
async fn list_projects_impl(db: crate::Backend) -> Result<impl Reply, Rejection> {
    let result = db.list_projects().await;
    let result: Result<PaginatedWrapperResponse<DataStoreProject>, ErrorStatusResponse> = result
        .map(|projects| {
            let total = projects.len();
            PaginatedWrapperResponse::with_page(projects, total, false)
        })
        .map_err(ErrorStatusResponse::from);
    wrap_list(result)
}

fn create_project(
    db: crate::Backend,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    info!("POST /projects");
    warp::path!("projects")
        .and(warp::post())
        .and(json_body::<CreateProject>())
        .and(with_db(db))
        .and_then(create_project_impl)
}

#[instrument(
    name = "rest_project_create",
    fields(user = %project.user, project = %project.project),
    skip(project, db)
)]
async fn create_project_impl(
    project: CreateProject,
    db: crate::Backend,
) -> Result<impl Reply, Rejection> {
    let result = db
        .register_project(
            &project.user,
            &project.project,
            &project.secret,
            project.activated,
        )
        .await;
    wrap_body(result.map_err(ErrorStatusResponse::from))
}

fn toggle_project(
    db: crate::Backend,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    info!("POST /projects/{{user}}/{{project}}/toggle");
    warp::path!("projects" / String / String / "toggle")
        .and(warp::post())
        .and(with_db(db))
        .and_then(toggle_project_impl)
}

#[instrument(name = "rest_project_toggle", skip(db))]
async fn toggle_project_impl(
    user: String,
    project: String,
    db: crate::Backend,
) -> Result<impl Reply, Rejection> {
    let result = db.toggle_project(&user, &project).await;
    wrap_body(result.map_err(ErrorStatusResponse::from))
}
