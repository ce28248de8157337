//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the admission middleware in front
//! - Wire up tracing and request ID layers
//! - Forward admitted requests to the single upstream
//! - Publish admission gauges while running
//! - Stop on shutdown broadcast

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{
        uri::{Authority, PathAndQuery, Scheme},
        Request, StatusCode, Uri,
    },
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::GateConfig;
use crate::http::middleware::admission_middleware;
use crate::lifecycle::shutdown::wait_for;
use crate::observability::metrics;
use crate::security::AdmissionFilter;

const GAUGE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid upstream address {address}: {reason}")]
    InvalidUpstream { address: String, reason: String },

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// State injected into the forwarding handler.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    pub upstream: Authority,
    pub timeout: Duration,
}

/// Public HTTP server: admission check, then forward.
pub struct GateServer {
    router: Router,
    config: GateConfig,
    filter: Arc<AdmissionFilter>,
}

impl GateServer {
    /// Create a server with a fresh admission filter built from `config`.
    pub fn new(config: GateConfig) -> Result<Self, ServerError> {
        let filter = Arc::new(AdmissionFilter::new(&config.admission));
        Self::with_filter(config, filter)
    }

    /// Create a server around an existing filter, e.g. one shared with the
    /// admin API.
    pub fn with_filter(config: GateConfig, filter: Arc<AdmissionFilter>) -> Result<Self, ServerError> {
        let upstream: Authority =
            config
                .upstream
                .address
                .parse()
                .map_err(|e: axum::http::uri::InvalidUri| ServerError::InvalidUpstream {
                    address: config.upstream.address.clone(),
                    reason: e.to_string(),
                })?;

        let state = AppState {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            upstream,
            timeout: Duration::from_secs(config.upstream.request_timeout_secs),
        };

        let router = build_router(filter.clone(), state);
        Ok(Self {
            router,
            config,
            filter,
        })
    }

    /// Run the server, accepting connections on the given listener until a
    /// shutdown is broadcast.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.address,
            admission_enabled = self.filter.is_enabled(),
            "Admission gate starting"
        );

        tokio::spawn(publish_gauges(self.filter.clone(), shutdown.resubscribe()));

        axum::serve(listener, self.router)
            .with_graceful_shutdown(wait_for(shutdown))
            .await?;

        tracing::info!("Admission gate stopped");
        Ok(())
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn filter(&self) -> Arc<AdmissionFilter> {
        self.filter.clone()
    }
}

/// Assemble the public router. Layers run outermost-first: tracing, request
/// ID, admission, then the forward handler.
pub fn build_router(filter: Arc<AdmissionFilter>, state: AppState) -> Router {
    Router::new()
        .fallback(forward_handler)
        .with_state(state)
        .layer(from_fn_with_state(filter, admission_middleware))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
}

/// Forward an admitted request to the upstream unchanged.
async fn forward_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (mut parts, body) = request.into_parts();

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(state.upstream.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(error = %e, "Could not build upstream URI");
            return (StatusCode::BAD_REQUEST, "Invalid request URI").into_response();
        }
    };

    let path = parts.uri.path().to_string();
    let request = Request::from_parts(parts, body);

    match tokio::time::timeout(state.timeout, state.client.request(request)).await {
        Ok(Ok(response)) => {
            metrics::record_upstream(response.status().as_u16(), start);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Ok(Err(e)) => {
            tracing::error!(path = %path, error = %e, "Upstream error");
            metrics::record_upstream(502, start);
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
        Err(_) => {
            tracing::error!(path = %path, timeout = ?state.timeout, "Upstream timed out");
            metrics::record_upstream(504, start);
            (StatusCode::GATEWAY_TIMEOUT, "Upstream request timed out").into_response()
        }
    }
}

/// Periodically export the number of tracked identities.
async fn publish_gauges(filter: Arc<AdmissionFilter>, shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(GAUGE_INTERVAL);
    let stop = wait_for(shutdown);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                metrics::record_tracked_identities(filter.buckets().tracked_identities());
            }
            _ = &mut stop => break,
        }
    }
}
