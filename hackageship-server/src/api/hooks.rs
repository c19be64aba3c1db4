use super::metrics::{track_hook, HookOutcome};
use super::prelude::*;
use crate::backend::HookError;
use crate::release::{HookSignature, ReleaseJob, CREATE_EVENT};
use futures_util::{pin_mut, Stream, StreamExt};
use tracing::{info, warn};
use tracing_attributes::instrument;
use warp::{http::StatusCode, Buf, Filter, Rejection, Reply};

const MAX_HOOK_BODY: usize = 1024 * 1024;

#[derive(Debug, Clone)]
struct HookHeaders {
    event: Option<String>,
    delivery: Option<String>,
    signature_sha256: Option<String>,
    signature_sha1: Option<String>,
}

impl HookHeaders {
    fn signature(&self) -> Option<HookSignature> {
        HookSignature::from_headers(
            self.signature_sha256.as_deref(),
            self.signature_sha1.as_deref(),
        )
    }

    fn is_create_event(&self) -> bool {
        self.event.as_deref() == Some(CREATE_EVENT)
    }
}

fn hook_headers() -> impl Filter<Extract = (HookHeaders,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-github-event")
        .and(warp::header::optional::<String>("x-github-delivery"))
        .and(warp::header::optional::<String>("x-hub-signature-256"))
        .and(warp::header::optional::<String>("x-hub-signature"))
        .map(
            |event, delivery, signature_sha256, signature_sha1| HookHeaders {
                event,
                delivery,
                signature_sha256,
                signature_sha1,
            },
        )
}

pub fn create_hook_api(
    db: crate::Backend,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    receive_hook(db)
}

fn receive_hook(
    db: crate::Backend,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    info!("POST /hook/{{user}}/{{project}}");
    warp::path!("hook" / String / String)
        .and(warp::post())
        .and(hook_headers())
        .and(warp::body::stream())
        .and(with_db(db))
        .and_then(receive_hook_impl)
}

#[instrument(
    name = "hook_receive",
    skip(headers, body, db),
    fields(event = ?headers.event, delivery = ?headers.delivery)
)]
async fn receive_hook_impl<S, B>(
    user: String,
    project: String,
    headers: HookHeaders,
    body: S,
    db: crate::Backend,
) -> Result<impl Reply, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>> + Send,
    B: Buf,
{
    match process_delivery(&user, &project, &headers, body, &db).await {
        Ok(outcome) => {
            track_hook(outcome);
            Ok(warp::reply::with_status("OK", StatusCode::OK))
        }
        Err(e) => {
            warn!("Rejected delivery for {}/{}: {}", user, project, e);
            track_hook(HookOutcome::Rejected);
            Err(warp::reject::custom(ErrorStatusResponse::from(e)))
        }
    }
}

async fn process_delivery<S, B>(
    user: &str,
    project: &str,
    headers: &HookHeaders,
    body: S,
    db: &crate::Backend,
) -> Result<HookOutcome, HookError>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    let target = db.find_hook_target(user, project).await?;
    let body = read_body(body).await?;
    db.authorize_hook(&target, &body, headers.signature().as_ref())?;

    if !headers.is_create_event() {
        info!("Ignoring {:?} event", headers.event);
        return Ok(HookOutcome::Ignored);
    }

    let job = ReleaseJob::from_create_event(&body)?;
    if !job.is_tag() {
        info!(ref_kind = ?job.ref_kind, "Ignoring create event for {}", job.tag_ref);
        return Ok(HookOutcome::Ignored);
    }

    db.enqueue_release(job).await?;
    Ok(HookOutcome::Enqueued)
}

async fn read_body<S, B>(body: S) -> Result<Vec<u8>, HookError>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    pin_mut!(body);
    let mut collected = Vec::new();

    while let Some(chunk) = body.next().await {
        let mut chunk = chunk.map_err(|e| {
            warn!("Failed to read hook body: {}", e);
            HookError::BadBody
        })?;
        while chunk.has_remaining() {
            let bytes = chunk.chunk();
            collected.extend_from_slice(bytes);
            let read = bytes.len();
            chunk.advance(read);
        }
        if collected.len() > MAX_HOOK_BODY {
            return Err(HookError::BadBody);
        }
    }

    Ok(collected)
}

#[cfg(test)]
mod integ_test {
    use super::*;
    use crate::test_utils::*;
    use json::object;
    use warp::test::request;

    const SECRET: &str = "s3cret";

    fn tag_payload(tag: &str, ref_type: &str) -> String {
        json::stringify(object! {
            "ref": tag,
            "ref_type": ref_type,
            "master_branch": "main",
            "repository": {
                "name": "lens",
                "full_name": "alice/lens",
                "clone_url": "https://github.com/alice/lens.git"
            }
        })
    }

    async fn deliver(
        db: &crate::Backend,
        path: &str,
        event: &str,
        body: &str,
        signature: &str,
    ) -> warp::http::Response<warp::hyper::body::Bytes> {
        let filter =
            create_hook_api(db.clone()).recover(crate::api::canned_response::handle_rejection);

        request()
            .path(path)
            .method("POST")
            .header("x-github-event", event)
            .header("x-github-delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958")
            .header("x-hub-signature", signature)
            .body(body.to_owned())
            .reply(&filter)
            .await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn tag_creation_enqueues_the_parsed_job() {
        let (db, mut receiver) = make_backend().await;
        register(&db, "alice", "lens", SECRET, true).await;
        let body = tag_payload("1.2.0", "tag");

        let signature = sign_body(body.as_bytes(), SECRET);
        let response = deliver(&db, "/hook/alice/lens", "create", &body, &signature).await;

        assert_ok_text(response);
        assert_eq!(
            receiver.next_job().await,
            Some(ReleaseJob {
                repository_name: "lens".to_owned(),
                clone_url: "https://github.com/alice/lens.git".to_owned(),
                tag_ref: "1.2.0".to_owned(),
                ref_kind: crate::release::RefKind::Tag,
            })
        );
        assert_eq!(db.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn sha256_signature_is_preferred() {
        use hmac::{Hmac, Mac};

        let (db, _receiver) = make_backend().await;
        register(&db, "alice", "lens", SECRET, true).await;
        let body = tag_payload("1.2.0", "tag");

        let mut mac = Hmac::<sha2::Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        let signature = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        let filter =
            create_hook_api(db.clone()).recover(crate::api::canned_response::handle_rejection);
        let response = request()
            .path("/hook/alice/lens")
            .method("POST")
            .header("x-github-event", "create")
            .header("x-hub-signature-256", signature)
            .header("x-hub-signature", "sha1=0000")
            .body(body)
            .reply(&filter)
            .await;

        assert_ok_text(response);
        assert_eq!(db.queue_depth(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn unknown_project_never_enqueues() {
        let (db, _receiver) = make_backend().await;
        let body = tag_payload("1.2.0", "tag");

        let signature = sign_body(body.as_bytes(), SECRET);
        let response = deliver(&db, "/hook/mallory/lens", "create", &body, &signature).await;

        assert_error_response(
            response,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Unknown project mallory/lens",
        );
        assert_eq!(db.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn project_lookup_comes_before_the_body() {
        let (db, _receiver) = make_backend().await;
        let filter =
            create_hook_api(db.clone()).recover(crate::api::canned_response::handle_rejection);

        let response = request()
            .path("/hook/mallory/lens")
            .method("POST")
            .header("x-github-event", "create")
            .header("x-hub-signature", "sha1=0000")
            .body(vec![b'x'; MAX_HOOK_BODY + 1])
            .reply(&filter)
            .await;

        assert_error_response(
            response,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Unknown project mallory/lens",
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn oversized_body_is_a_bad_body() {
        let (db, _receiver) = make_backend().await;
        register(&db, "alice", "lens", SECRET, true).await;
        let body = vec![b'x'; MAX_HOOK_BODY + 1];
        let signature = sign_body(&body, SECRET);
        let filter =
            create_hook_api(db.clone()).recover(crate::api::canned_response::handle_rejection);

        let response = request()
            .path("/hook/alice/lens")
            .method("POST")
            .header("x-github-event", "create")
            .header("x-hub-signature", signature)
            .body(body)
            .reply(&filter)
            .await;

        assert_error_response(
            response,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid Request Body!",
        );
        assert_eq!(db.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn inactive_project_is_forbidden() {
        let (db, _receiver) = make_backend().await;
        register(&db, "alice", "lens", SECRET, false).await;
        let body = tag_payload("1.2.0", "tag");

        let signature = sign_body(body.as_bytes(), SECRET);
        let response = deliver(&db, "/hook/alice/lens", "create", &body, &signature).await;

        assert_error_response(
            response,
            StatusCode::FORBIDDEN,
            "Project alice/lens is not activated",
        );
        assert_eq!(db.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn bad_signature_is_rejected() {
        let (db, _receiver) = make_backend().await;
        register(&db, "alice", "lens", SECRET, true).await;
        let body = tag_payload("1.2.0", "tag");

        let signature = sign_body(body.as_bytes(), "guess");
        let response = deliver(&db, "/hook/alice/lens", "create", &body, &signature).await;

        assert_error_response(
            response,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Invalid X-Hub-Signature!",
        );
        assert_eq!(db.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn other_events_are_acknowledged_only() {
        let (db, _receiver) = make_backend().await;
        register(&db, "alice", "lens", SECRET, true).await;
        let body = tag_payload("1.2.0", "tag");

        let signature = sign_body(body.as_bytes(), SECRET);
        let response = deliver(&db, "/hook/alice/lens", "push", &body, &signature).await;

        assert_ok_text(response);
        assert_eq!(db.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn branch_creation_is_acknowledged_only() {
        let (db, _receiver) = make_backend().await;
        register(&db, "alice", "lens", SECRET, true).await;
        let body = tag_payload("feature/optics", "branch");

        let signature = sign_body(body.as_bytes(), SECRET);
        let response = deliver(&db, "/hook/alice/lens", "create", &body, &signature).await;

        assert_ok_text(response);
        assert_eq!(db.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn unparseable_payload_is_rejected() {
        let (db, _receiver) = make_backend().await;
        register(&db, "alice", "lens", SECRET, true).await;
        let body = "{\"ref\": \"1.2.0\"";

        let signature = sign_body(body.as_bytes(), SECRET);
        let response = deliver(&db, "/hook/alice/lens", "create", body, &signature).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let parsed = json::parse(std::str::from_utf8(response.body()).unwrap()).unwrap();
        assert!(parsed["status"]["error"][0]
            .as_str()
            .unwrap()
            .starts_with("Invalid create event: Could not parse the json"));
        assert_eq!(db.queue_depth(), 0);
    }
}
