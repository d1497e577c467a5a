//! The HTTP control surface: version info, and job creation/lookup/
//! cancellation, assembled from handler functions plus middleware
//! layers the usual `axum` way.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use classifier_core::{EngineError, ItemScope, JobId};
use classifier_storage::{DurableCatalog, FeatureExtractor};
use classifier_tagger::{TagDocumentFetcher, TagIndexFetcher};

use crate::error::{EngineHttpError, EngineHttpResult};
use crate::jobs::{cancel_job, remove_job, submit_job};
use crate::middleware::{enforce_allowed_ip, strip_xml_suffix};
use crate::state::EngineState;
use crate::xml::{job_status_xml, parse_tag_url, version_xml};

const CONTENT_TYPE_XML: &str = "application/xml";

pub fn router<C, F, T, I>(state: Arc<EngineState<C, F, T, I>>) -> Router
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
    T: TagDocumentFetcher + 'static,
    I: TagIndexFetcher + 'static,
{
    Router::new()
        .route("/classifier", get(version))
        .route("/classifier/jobs", post(create_job))
        .route("/classifier/jobs/{id}", get(get_job).delete(delete_job))
        .layer(axum::middleware::from_fn(strip_xml_suffix))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            enforce_allowed_ip,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn xml_response(status: StatusCode, body: String) -> Response {
    (status, [("Content-Type", CONTENT_TYPE_XML)], body).into_response()
}

async fn version() -> Response {
    xml_response(StatusCode::OK, version_xml())
}

async fn create_job<C, F, T, I>(
    State(state): State<Arc<EngineState<C, F, T, I>>>,
    body: String,
) -> EngineHttpResult<Response>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
    T: TagDocumentFetcher + 'static,
    I: TagIndexFetcher + 'static,
{
    let tag_url = parse_tag_url(&body).map_err(EngineHttpError::BadRequest)?;
    let job = submit_job(&state, tag_url, ItemScope::All, chrono::Utc::now()).await;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/classifier/jobs/{}", job.id)) {
        headers.insert("Location", location);
    }
    Ok((
        StatusCode::CREATED,
        headers,
        [("Content-Type", CONTENT_TYPE_XML)],
        job_status_xml(&job),
    )
        .into_response())
}

async fn get_job<C, F, T, I>(
    State(state): State<Arc<EngineState<C, F, T, I>>>,
    Path(id): Path<JobId>,
) -> EngineHttpResult<Response>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    let job = state
        .get_job(id)
        .await
        .filter(|job| job.visible_to_get())
        .ok_or_else(|| EngineHttpError::from(EngineError::JobNotFound(id.to_string())))?;
    Ok(xml_response(StatusCode::OK, job_status_xml(&job)))
}

async fn delete_job<C, F, T, I>(
    State(state): State<Arc<EngineState<C, F, T, I>>>,
    Path(id): Path<JobId>,
) -> EngineHttpResult<StatusCode>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
{
    let Some(job) = state.get_job(id).await.filter(|job| job.visible_to_get()) else {
        return Err(EngineHttpError::from(EngineError::JobNotFound(id.to_string())));
    };

    let removed = if job.state == classifier_core::JobState::Complete {
        remove_job(&state, id).await
    } else {
        cancel_job(&state, id).await
    };

    if removed {
        Ok(StatusCode::OK)
    } else {
        Err(EngineHttpError::from(EngineError::JobNotFound(id.to_string())))
    }
}
