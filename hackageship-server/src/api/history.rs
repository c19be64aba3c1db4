use super::prelude::*;
use crate::backend::models::{DataStoreHistoryEntry, DataStoreHistoryList};
use tracing::info;
use tracing_attributes::instrument;
use warp::{Filter, Rejection, Reply};

type HistoryResponse = PaginatedWrapperResponse<DataStoreHistoryEntry>;

impl From<DataStoreHistoryList> for HistoryResponse {
    fn from(source: DataStoreHistoryList) -> Self {
        PaginatedWrapperResponse::with_page(
            source.entries,
            source.total_count as usize,
            source.has_more,
        )
    }
}

pub fn create_history_api(
    db: crate::Backend,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    list_history(db.clone()).or(list_project_history(db))
}

fn list_history(
    db: crate::Backend,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    info!("GET /history");
    warp::path!("history")
        .and(warp::get())
        .and(warp::query::<ApiPagination>())
        .and(with_db(db))
        .and_then(list_history_impl)
}

#[instrument(name = "rest_history_list", skip(db))]
async fn list_history_impl(
    pagination: ApiPagination,
    db: crate::Backend,
) -> Result<impl Reply, Rejection> {
    let result = db.list_history(pagination.into()).await;
    let result: Result<HistoryResponse, ErrorStatusResponse> = result
        .map(HistoryResponse::from)
        .map_err(ErrorStatusResponse::from);
    wrap_list(result)
}

fn list_project_history(
    db: crate::Backend,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    info!("GET /history/{{user}}/{{project}}");
    warp::path!("history" / String / String)
        .and(warp::get())
        .and(warp::query::<ApiPagination>())
        .and(with_db(db))
        .and_then(list_project_history_impl)
}

#[instrument(name = "rest_history_project", skip(db))]
async fn list_project_history_impl(
    user: String,
    project: String,
    pagination: ApiPagination,
    db: crate::Backend,
) -> Result<impl Reply, Rejection> {
    let result = db
        .list_project_history(&user, &project, pagination.into())
        .await;
    let result: Result<HistoryResponse, ErrorStatusResponse> = result
        .map(HistoryResponse::from)
        .map_err(ErrorStatusResponse::from);
    wrap_list(result)
}

#[cfg(test)]
mod integ_test {
    use super::*;
    use crate::database::prelude::CreateHistoryParam;
    use crate::test_utils::*;
    use warp::http::StatusCode;
    use warp::test::request;

    async fn record(db: &crate::Backend, repository: &str, version: &str, okay: bool) {
        db.record_release(CreateHistoryParam {
            repository: repository.to_owned(),
            version: version.to_owned(),
            package_name: repository.to_owned(),
            message: if okay { "All good!" } else { "Cabal file not found" }.to_owned(),
            publish_okay: okay,
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_list_history() {
        let (db, _receiver) = make_backend().await;
        record(&db, "lens", "1.0", false).await;
        record(&db, "lens", "1.1", true).await;
        record(&db, "text", "2.0", true).await;
        let filter = create_history_api(db.clone());

        let response = request()
            .path("/history?page=0&size=2")
            .method("GET")
            .reply(&filter)
            .await;

        let body = parse_list_body(&response);
        assert_eq!(response.headers()[TOTAL_COUNT_HEADER], "3");
        assert_eq!(response.headers()[HAS_MORE_HEADER], "true");
        assert_eq!(body.len(), 2);
        assert_eq!(body[0]["repository"], "text");
        assert_eq!(body[1]["version"], "1.1");
        assert_eq!(body[1]["message"], "All good!");
        assert_eq!(body[1]["publish_okay"], true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_list_history_defaults() {
        let (db, _receiver) = make_backend().await;
        record(&db, "lens", "1.0", false).await;
        let filter = create_history_api(db.clone());

        let response = request().path("/history").method("GET").reply(&filter).await;

        let body = parse_list_body(&response);
        assert_eq!(response.headers()[TOTAL_COUNT_HEADER], "1");
        assert_eq!(response.headers()[HAS_MORE_HEADER], "false");
        assert_eq!(body[0]["message"], "Cabal file not found");
        assert_eq!(body[0]["publish_okay"], false);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_project_history() {
        let (db, _receiver) = make_backend().await;
        register(&db, "alice", "lens", "s3cret", true).await;
        record(&db, "lens", "1.0", true).await;
        record(&db, "text", "2.0", true).await;
        let filter =
            create_history_api(db.clone()).recover(crate::api::canned_response::handle_rejection);

        let response = request()
            .path("/history/alice/lens")
            .method("GET")
            .reply(&filter)
            .await;
        let body = parse_list_body(&response);
        assert_eq!(body.len(), 1);
        assert_eq!(body[0]["repository"], "lens");

        let response = request()
            .path("/history/alice/text")
            .method("GET")
            .reply(&filter)
            .await;
        assert_error_response(response, StatusCode::NOT_FOUND, "Project alice/text not found");
    }
}
