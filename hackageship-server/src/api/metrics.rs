use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, TextEncoder,
};
use warp::http::header::CONTENT_TYPE;

lazy_static! {
    static ref HTTP_RESPONSES: IntCounterVec = register_int_counter_vec!(
        "hackageship_http_responses_total",
        "Responses sent by the public API, by status code",
        &["status"]
    )
    .expect("http response counter registers");
    static ref HOOK_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "hackageship_hook_deliveries_total",
        "Webhook deliveries, by what the service did with them",
        &["outcome"]
    )
    .expect("hook outcome counter registers");
    static ref RELEASE_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "hackageship_releases_total",
        "Finished release attempts, by result",
        &["result"]
    )
    .expect("release outcome counter registers");
    static ref QUEUED_RELEASES: IntGauge = register_int_gauge!(
        "hackageship_queued_releases",
        "Release jobs waiting for the worker"
    )
    .expect("queue gauge registers");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Enqueued,
    Ignored,
    Rejected,
}

impl HookOutcome {
    fn label(&self) -> &'static str {
        match self {
            HookOutcome::Enqueued => "enqueued",
            HookOutcome::Ignored => "ignored",
            HookOutcome::Rejected => "rejected",
        }
    }
}

pub fn track_status(info: warp::log::Info) {
    HTTP_RESPONSES
        .with_label_values(&[info.status().as_str()])
        .inc();
}

pub fn track_hook(outcome: HookOutcome) {
    HOOK_OUTCOMES.with_label_values(&[outcome.label()]).inc();
}

pub fn track_release(publish_okay: bool) {
    let result = if publish_okay { "published" } else { "failed" };
    RELEASE_OUTCOMES.with_label_values(&[result]).inc();
}

pub fn set_queue_depth(depth: usize) {
    QUEUED_RELEASES.set(depth as i64);
}

#[tracing::instrument]
pub fn metrics_endpoint() -> impl warp::Reply {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut result = Vec::new();
    encoder.encode(&metric_families, &mut result).ok();

    warp::reply::with_header(result, CONTENT_TYPE, encoder.format_type())
}
