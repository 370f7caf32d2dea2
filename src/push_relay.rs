//! Local HTTP relay for device-initiated push traffic.
//!
//! Wibeee firmware can be pointed at this server instead of the vendor
//! cloud. Recognized push requests are dispatched to the registered local
//! handler by MAC address and, depending on the registration's upstream
//! policy, forwarded verbatim to the cloud. Devices probe unknown paths,
//! so anything unrecognized gets a blank 200.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{OriginalUri, RawQuery, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::decoder::{decode_json, Snapshot};
use crate::error::{BridgeError, Result};
use crate::proxy_registry::{ProxyRegistry, UpstreamPolicy};
use crate::scrubber::scrub_text;

struct RelayState {
    registry: Arc<ProxyRegistry>,
    upstream_client: reqwest::Client,
}

/// One process-wide push relay server. Created lazily by the host when the
/// first device wants push data; torn down (idempotently) on shutdown.
pub struct PushRelay {
    local_addr: SocketAddr,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl PushRelay {
    /// Binds the relay and starts serving. Binding to port 0 picks an
    /// ephemeral port, available afterwards via [`PushRelay::local_addr`].
    pub async fn start(registry: Arc<ProxyRegistry>, bind: SocketAddr) -> Result<Self> {
        // The Wibeee Cloud terminates idle keep-alive connections
        // mid-session, so pooled upstream connections produce spurious
        // disconnects. Keep none idle.
        let upstream_client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| BridgeError::Config(format!("cannot build upstream client: {e}")))?;

        let state = Arc::new(RelayState {
            registry,
            upstream_client,
        });
        let app = Router::new()
            .route("/Wibeee/receiver", get(handle_query_push))
            .route("/Wibeee/receiverAvg", get(handle_query_push))
            .route("/Wibeee/receiverLeap", get(handle_query_push))
            .route("/Wibeee/receiverAvgPost", post(handle_json_push))
            .route("/Wibeee/receiverJSON", post(handle_json_push))
            .fallback(handle_unknown)
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|e| BridgeError::Network(format!("cannot bind push relay on {bind}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::Network(e.to_string()))?;
        info!(%local_addr, "push relay listening");

        let server = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!(%err, "push relay server exited");
            }
        });
        Ok(Self {
            local_addr,
            server: Mutex::new(Some(server)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting push traffic. Safe to call more than once; the
    /// second call is a no-op.
    pub fn shutdown(&self) {
        let mut server = self.server.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = server.take() {
            handle.abort();
            info!("push relay shut down");
        }
    }
}

impl Drop for PushRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// GET receivers: identity and measurements come from the query string.
async fn handle_query_push(
    State(state): State<Arc<RelayState>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    RawQuery(query): RawQuery,
) -> Response {
    let query = query.unwrap_or_default();
    let fields: Snapshot = url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let Some(mac) = fields.get("mac").cloned() else {
        let err = BridgeError::MalformedRequest(format!("no mac in {} {}", method, uri.path()));
        debug!(%err, "rejecting push");
        return StatusCode::BAD_REQUEST.into_response();
    };
    dispatch(&state, method, &uri, &mac, fields, None).await
}

/// POST receivers: identity and measurements come from a JSON body, with
/// the firmware-bug repair pass. On unrecoverable parse failure the
/// identity is absent, so dispatch is skipped.
async fn handle_json_push(
    State(state): State<Arc<RelayState>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    body: String,
) -> Response {
    let fields = match decode_json(&body) {
        Ok(fields) => fields,
        Err(err) => {
            debug!(%err, body = %scrub_text(&body), "undecodable push JSON");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let Some(mac) = fields.get("mac").cloned() else {
        debug!(path = %uri.path(), "push JSON without mac");
        return StatusCode::NOT_FOUND.into_response();
    };
    dispatch(&state, method, &uri, &mac, fields, Some(body)).await
}

async fn handle_unknown(method: Method, OriginalUri(uri): OriginalUri) -> StatusCode {
    debug!(%method, path = %uri.path(), "ignoring unexpected request");
    StatusCode::OK
}

async fn dispatch(
    state: &RelayState,
    method: Method,
    uri: &Uri,
    mac: &str,
    fields: Snapshot,
    forward_body: Option<String>,
) -> Response {
    let Some(registration) = state.registry.lookup(mac) else {
        let err = BridgeError::NotRegistered(mac.to_string());
        debug!(%err, %method, path = %uri.path(), "ignoring push data");
        return StatusCode::NOT_FOUND.into_response();
    };

    debug!(%mac, %method, path = %uri.path(), keys = fields.len(), "updating sinks from push data");
    (registration.handler)(fields);

    let upstream = match registration.policy {
        UpstreamPolicy::Url(url) => url,
        UpstreamPolicy::LocalOnly | UpstreamPolicy::Disabled => {
            debug!(%mac, "accepted local-only push data");
            return StatusCode::ACCEPTED.into_response();
        }
    };

    let path_qs = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let url = format!("{upstream}{path_qs}");
    debug!(%mac, %url, "forwarding push data");

    let mut request = state.upstream_client.request(method, &url);
    if let Some(body) = forward_body {
        request = request.body(body);
    }
    match request.send().await {
        Ok(upstream_response) => relay_response(upstream_response).await,
        Err(err) => {
            // No retry here: the device is already push-retrying.
            error!(%err, %url, "upstream request failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Relays the upstream's status, headers and body back to the device.
async fn relay_response(upstream_response: reqwest::Response) -> Response {
    let status = upstream_response.status();
    let headers = upstream_response.headers().clone();
    let body = match upstream_response.bytes().await {
        Ok(body) => body,
        Err(err) => {
            error!(%err, "failed reading upstream response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if !status.is_success() {
        warn!(%status, "upstream returned error for forwarded request");
    }

    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        // Hop-by-hop and length headers are re-established locally.
        if name == header::CONNECTION
            || name == header::TRANSFER_ENCODING
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        builder = builder.header(name.clone(), value.clone());
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
