//! Control-surface middleware: `.xml` suffix stripping and the
//! `allowed_ip` source-address gate, layered in ahead of the handlers
//! the usual `axum::middleware::from_fn` way.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::Response;

use classifier_storage::{DurableCatalog, FeatureExtractor};
use classifier_tagger::{TagDocumentFetcher, TagIndexFetcher};

use crate::error::EngineHttpError;
use crate::state::EngineState;

/// Strips a trailing `.xml` from the request path before routing, so
/// `/classifier/jobs/{id}.xml` and `/classifier/jobs/{id}` reach the
/// same handler.
pub async fn strip_xml_suffix(mut request: Request, next: Next) -> Response {
    if let Some(stripped) = request.uri().path().strip_suffix(".xml") {
        let mut parts = request.uri().clone().into_parts();
        let path_and_query = match request.uri().query() {
            Some(query) => format!("{stripped}?{query}"),
            None => stripped.to_string(),
        };
        if let Ok(new_path_and_query) = path_and_query.parse() {
            parts.path_and_query = Some(new_path_and_query);
            if let Ok(new_uri) = Uri::from_parts(parts) {
                *request.uri_mut() = new_uri;
            }
        }
    }
    next.run(request).await
}

/// Rejects requests whose source address doesn't match the configured
/// `allowed_ip`, when one is set. Runs before routing/dispatch.
pub async fn enforce_allowed_ip<C, F, T, I>(
    State(state): State<Arc<EngineState<C, F, T, I>>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, EngineHttpError>
where
    C: DurableCatalog + 'static,
    F: FeatureExtractor + 'static,
    T: TagDocumentFetcher + 'static,
    I: TagIndexFetcher + 'static,
{
    if let Some(allowed) = state.allowed_ip {
        if addr.ip() != allowed {
            return Err(EngineHttpError::Forbidden);
        }
    }
    Ok(next.run(request).await)
}
