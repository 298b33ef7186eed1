//! Route table
//!
//! Pipeline routes live under the configured prefix (`/api` by default);
//! `/health` and `/metrics` sit at the root.

use super::error::handle_rejection;
use super::handlers::{self, ListQuery};
use crate::config::ServerSection;
use crate::pipeline::PipelineService;
use crate::task::{StageKind, TaskRegistry};
use std::convert::Infallible;
use warp::{Filter, Rejection, Reply};

/// Largest JSON body accepted by submission routes
const MAX_BODY_BYTES: u64 = 64 * 1024;

type Routed = (warp::reply::Response,);

fn with_service(
    service: PipelineService,
) -> impl Filter<Extract = (PipelineService,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

fn with_registry(
    registry: TaskRegistry,
) -> impl Filter<Extract = (TaskRegistry,), Error = Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// `<segment>/status/{id}` and `<segment>/download/{id}` for one stage
fn stage_routes(
    segment: &'static str,
    kind: StageKind,
    registry: TaskRegistry,
) -> impl Filter<Extract = Routed, Error = Rejection> + Clone {
    let status = warp::path(segment)
        .and(warp::path("status"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_registry(registry.clone()))
        .and_then(handlers::task_status);

    let download = warp::path(segment)
        .and(warp::path("download"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_registry(registry))
        .and_then(move |task_id: String, registry: TaskRegistry| {
            handlers::download(kind, task_id, registry)
        });

    status.or(download).unify()
}

fn submission_routes(
    service: PipelineService,
) -> impl Filter<Extract = Routed, Error = Rejection> + Clone {
    let segmentation = warp::path!("segmentation" / "predict")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(handlers::submit_segmentation);

    let features = warp::path!("features" / "extract")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service.clone()))
        .and_then(handlers::submit_feature_extraction);

    let reports = warp::path!("reports" / "generate")
        .and(warp::post())
        .and(json_body())
        .and(with_service(service))
        .and_then(handlers::submit_report);

    segmentation.or(features).unify().or(reports).unify()
}

fn task_routes(registry: TaskRegistry) -> impl Filter<Extract = Routed, Error = Rejection> + Clone {
    let list = warp::path!("tasks")
        .and(warp::get())
        .and(warp::query::<ListQuery>())
        .and(with_registry(registry.clone()))
        .and_then(handlers::list_tasks);

    let status = warp::path!("tasks" / String)
        .and(warp::get())
        .and(with_registry(registry.clone()))
        .and_then(handlers::task_status);

    let delete = warp::path!("tasks" / String)
        .and(warp::delete())
        .and(with_registry(registry.clone()))
        .and_then(handlers::delete_task);

    let preview = warp::path!("reports" / "preview" / String)
        .and(warp::get())
        .and(with_registry(registry))
        .and_then(handlers::report_preview);

    list.or(status)
        .unify()
        .or(delete)
        .unify()
        .or(preview)
        .unify()
}

fn cors(server: &ServerSection) -> warp::cors::Builder {
    let cors = warp::cors()
        .allow_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
        .allow_headers(vec!["content-type", "authorization"]);

    if server.cors_origins.is_empty() || server.cors_origins.iter().any(|o| o == "*") {
        cors.allow_any_origin()
    } else {
        cors.allow_origins(server.cors_origins.iter().map(String::as_str))
    }
}

/// Full route table with CORS, request tracing and rejection handling
pub fn routes(
    service: PipelineService,
    server: &ServerSection,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let registry = service.registry().clone();

    let pipeline = stage_routes("segmentation", StageKind::Segmentation, registry.clone())
        .or(stage_routes(
            "features",
            StageKind::FeatureExtraction,
            registry.clone(),
        ))
        .unify()
        .or(stage_routes(
            "reports",
            StageKind::ReportGeneration,
            registry.clone(),
        ))
        .unify()
        .or(submission_routes(service))
        .unify()
        .or(task_routes(registry.clone()))
        .unify();

    let api = warp::path(server.api_prefix.clone()).and(pipeline);

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_registry(registry))
        .and_then(handlers::health);

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and_then(handlers::metrics_snapshot);

    api.or(health)
        .unify()
        .or(metrics)
        .unify()
        .with(cors(server))
        .with(warp::trace::request())
        .recover(handle_rejection)
}
