mod history;
mod hooks;
pub mod metrics;
mod projects;

use warp::{Filter, Reply};

pub async fn create_filters(
    db: crate::Backend,
) -> impl Filter<Extract = (impl Reply,), Error = std::convert::Infallible> + Clone + Send + Sync + 'static
{
    filters::api(db)
        .recover(canned_response::handle_rejection)
        .with(warp::trace::request())
}

pub mod prelude {
    pub use super::models::*;
    use crate::backend::models::PaginationOptions;
    use serde::{de::DeserializeOwned, Deserialize, Serialize};
    use warp::{reject::Reject, Filter, Rejection, Reply};

    pub const DEFAULT_PAGE_SIZE: u32 = 50;

    pub fn json_body<T: Send + DeserializeOwned>(
    ) -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone {
        // When accepting a body, we want a JSON body
        // (and to reject huge payloads)...
        warp::body::content_length_limit(1024 * 16).and(warp::body::json())
    }

    pub fn with_db(
        db: crate::Backend,
    ) -> impl Filter<Extract = (crate::Backend,), Error = std::convert::Infallible> + Clone {
        warp::any().map(move || db.clone())
    }

    pub const TOTAL_COUNT_HEADER: &str = "x-total-count";
    pub const HAS_MORE_HEADER: &str = "x-has-more";

    pub fn wrap_body<T>(body: Result<T, impl Reject>) -> Result<impl Reply, Rejection>
    where
        T: Serialize,
    {
        let body = match body {
            Err(e) => {
                return Err(warp::reject::custom(e));
            }
            Ok(value) => value,
        };

        let response = ApplicationResponse {
            status: StatusResponse::ok(),
            data: Some(body),
        };

        Ok(warp::reply::json(&response))
    }

    /// Listings are bare JSON arrays. Paging state goes into headers.
    pub fn wrap_list<T>(
        body: Result<PaginatedWrapperResponse<T>, impl Reject>,
    ) -> Result<impl Reply, Rejection>
    where
        T: Serialize,
    {
        let body = match body {
            Err(e) => {
                return Err(warp::reject::custom(e));
            }
            Ok(value) => value,
        };

        let reply = warp::reply::json(&body.data);
        let reply = warp::reply::with_header(reply, TOTAL_COUNT_HEADER, body.page.total.to_string());
        let reply = warp::reply::with_header(reply, HAS_MORE_HEADER, body.page.has_more.to_string());
        Ok(reply)
    }

    #[derive(Debug, Deserialize, Serialize)]
    pub struct ApiPagination {
        pub page: Option<u32>,
        pub size: Option<u32>,
    }

    impl Default for ApiPagination {
        fn default() -> Self {
            Self {
                page: Some(0),
                size: Some(DEFAULT_PAGE_SIZE),
            }
        }
    }

    impl From<ApiPagination> for PaginationOptions {
        fn from(source: ApiPagination) -> Self {
            Self {
                page_number: source.page.unwrap_or(0) as u64,
                page_size: source.size.unwrap_or(DEFAULT_PAGE_SIZE).max(1) as u64,
            }
        }
    }

    pub struct PaginatedWrapperResponse<T>
    where
        T: Serialize,
    {
        data: Vec<T>,
        page: super::models::PaginationState,
    }

    impl<T: Serialize> PaginatedWrapperResponse<T> {
        pub fn with_page(body: Vec<T>, total: usize, has_more: bool) -> PaginatedWrapperResponse<T> {
            PaginatedWrapperResponse {
                data: body,
                page: PaginationState { total, has_more },
            }
        }
    }
}

mod models {
    use serde::Serialize;
    use warp::http::StatusCode;

    #[derive(Debug)]
    pub struct PaginationState {
        pub has_more: bool,
        pub total: usize,
    }

    #[derive(Serialize)]
    #[serde(remote = "StatusCode")]
    struct StatusCodeDef {
        #[serde(getter = "StatusCode::as_u16")]
        code: u16,
    }

    #[derive(Debug, Serialize)]
    #[serde(untagged)]
    pub enum StatusResponse {
        Success(SuccessfulStatusResponse),
        Error(ErrorStatusResponse),
    }

    #[derive(Debug, Serialize)]
    pub struct SuccessfulStatusResponse {
        #[serde(flatten, with = "StatusCodeDef")]
        pub code: StatusCode,
    }

    #[derive(Debug, Serialize)]
    pub struct ErrorStatusResponse {
        #[serde(flatten, with = "StatusCodeDef")]
        pub code: StatusCode,
        pub error: Option<Vec<String>>,
    }

    impl ErrorStatusResponse {
        pub fn from_error_message(code: StatusCode, error: String) -> Self {
            Self {
                code,
                error: Some(vec![error]),
            }
        }
    }

    impl StatusResponse {
        pub fn ok() -> Self {
            StatusResponse::Success(SuccessfulStatusResponse {
                code: StatusCode::OK,
            })
        }

        pub fn status(&self) -> StatusCode {
            match self {
                StatusResponse::Error(err) => err.code,
                StatusResponse::Success(suc) => suc.code,
            }
        }
    }

    #[derive(Debug, Serialize)]
    pub struct ApplicationResponse<T>
    where
        T: Serialize,
    {
        pub status: StatusResponse,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub data: Option<T>,
    }

    #[test]
    fn validate_empty_envelope_serialize() {
        use json::object;

        let serialized = serde_json::to_string(&ApplicationResponse::<()> {
            status: StatusResponse::ok(),
            data: None,
        })
        .unwrap();

        assert_eq!(
            serialized,
            json::stringify(object! {
                    "status": {
                        "code": 200
                    },
            })
        );
    }

    #[test]
    fn validate_error_envelope_serialize() {
        use json::object;

        let serialized = serde_json::to_string(&ApplicationResponse::<()> {
            status: StatusResponse::Error(ErrorStatusResponse::from_error_message(
                StatusCode::FORBIDDEN,
                "Project alice/lens is not activated".to_owned(),
            )),
            data: None,
        })
        .unwrap();

        assert_eq!(
            serialized,
            json::stringify(object! {
                "status": {
                    "code": 403,
                    "error": ["Project alice/lens is not activated"]
                },
            })
        );
    }
}

mod filters {
    use warp::{Filter, Rejection, Reply};

    pub fn api(
        db: crate::Backend,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        super::hooks::create_hook_api(db.clone())
            .or(super::projects::create_project_api(db.clone()))
            .or(super::history::create_history_api(db))
            .with(warp::log::custom(super::metrics::track_status))
    }
}

mod canned_response {
    use super::models::*;
    use crate::backend::{BackendError, HookError};
    use crate::database::DatabaseError;
    use std::convert::Infallible;
    use std::error::Error;
    use tracing::error;
    use warp::{http::StatusCode, reject::Reject, Rejection, Reply};

    impl From<Rejection> for ErrorStatusResponse {
        fn from(source: Rejection) -> Self {
            if source.is_not_found() {
                ErrorStatusResponse::from_error_message(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND".to_owned(),
                )
            } else if let Some(resp) = source.find::<ErrorStatusResponse>() {
                resp.into()
            } else if let Some(e) = source.find::<warp::filters::body::BodyDeserializeError>() {
                let message_body: String = match e.source() {
                    Some(cause) => cause.to_string(),
                    None => "BAD_REQUEST".into(),
                };
                ErrorStatusResponse::from_error_message(StatusCode::BAD_REQUEST, message_body)
            } else if let Some(e) = source.find::<warp::reject::InvalidQuery>() {
                ErrorStatusResponse::from_error_message(StatusCode::BAD_REQUEST, e.to_string())
            } else if source.find::<warp::reject::PayloadTooLarge>().is_some() {
                ErrorStatusResponse::from_error_message(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "PAYLOAD_TOO_LARGE".to_owned(),
                )
            } else if source.find::<warp::reject::LengthRequired>().is_some() {
                ErrorStatusResponse::from_error_message(
                    StatusCode::LENGTH_REQUIRED,
                    "LENGTH_REQUIRED".to_owned(),
                )
            } else if source.find::<warp::reject::MethodNotAllowed>().is_some() {
                ErrorStatusResponse::from_error_message(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "METHOD_NOT_ALLOWED".to_owned(),
                )
            } else {
                error!("unhandled rejection: {:?}", source);
                ErrorStatusResponse::from_error_message(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "UNHANDLED_REJECTION".to_owned(),
                )
            }
        }
    }

    impl From<&ErrorStatusResponse> for ErrorStatusResponse {
        fn from(source: &ErrorStatusResponse) -> Self {
            Self {
                code: source.code,
                error: source.error.clone(),
            }
        }
    }

    impl From<BackendError> for ErrorStatusResponse {
        fn from(error: BackendError) -> Self {
            (&error).into()
        }
    }

    impl From<&BackendError> for ErrorStatusResponse {
        fn from(error: &BackendError) -> Self {
            let message = error.to_string();
            match error {
                BackendError::DatabaseError { source } => match source {
                    DatabaseError::NotFound { error } => ErrorStatusResponse::from_error_message(
                        StatusCode::NOT_FOUND,
                        error.to_string(),
                    ),
                    DatabaseError::AlreadyExists { error } => {
                        ErrorStatusResponse::from_error_message(
                            StatusCode::CONFLICT,
                            error.to_string(),
                        )
                    }
                    _ => {
                        error!("Internal Error: {}", source);
                        ErrorStatusResponse::from_error_message(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            message,
                        )
                    }
                },
                BackendError::ConstraintViolation { reason } => {
                    ErrorStatusResponse::from_error_message(
                        StatusCode::BAD_REQUEST,
                        reason.to_string(),
                    )
                }
            }
        }
    }

    impl From<HookError> for ErrorStatusResponse {
        fn from(error: HookError) -> Self {
            (&error).into()
        }
    }

    impl From<&HookError> for ErrorStatusResponse {
        fn from(error: &HookError) -> Self {
            let code = match error {
                HookError::InactiveProject { .. } => StatusCode::FORBIDDEN,
                HookError::Registry { source } => {
                    error!("Internal Error: {}", source);
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                HookError::QueueClosed { .. } => {
                    error!("Release worker is gone, refusing delivery");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            ErrorStatusResponse::from_error_message(code, error.to_string())
        }
    }

    impl Reject for ErrorStatusResponse {}

    pub async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
        let status = StatusResponse::Error(err.into());
        let status_code = status.status();
        let response: ApplicationResponse<()> = ApplicationResponse {
            data: None,
            status,
        };

        let json = warp::reply::json(&response);

        Ok(warp::reply::with_status(json, status_code))
    }
}
