use anyhow::{Context, Result};
use std::future::Future;
use std::io;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::mpsc;

use super::auth::Authorized;
use super::{images::get_image, log_requests, state::*, stream_song::stream_song};
use crate::catalog_store::EntityKind;
use crate::feed::{
    parse_watermark, ChannelWriter, SyncFeedService, LAST_MODIFIED_HEADER, MODIFIED_SINCE_HEADER,
    RECORDS_DELETED_HEADER, RECORDS_MODIFIED_HEADER,
};

pub const SERVER_VERSION_HEADER: &str = "x-server-version";

/// Chunks buffered between the feed writer and the response body.
const FEED_CHANNEL_CAPACITY: usize = 4;

#[derive(Serialize)]
struct ServerStats {
    pub version: String,
    pub uptime: String,
    pub hash: String,
    pub scanning: bool,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

pub fn server_version(hash: &str) -> String {
    format!("{} ({})", env!("CARGO_PKG_VERSION"), hash)
}

async fn info(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        scanning: state.scanner.as_ref().is_some_and(|s| s.is_active()),
    };
    (
        [(SERVER_VERSION_HEADER, server_version(&state.hash))],
        Json(stats),
    )
}

async fn start_scan(_auth: Authorized, State(scanner): State<OptionalScanner>) -> Response {
    let Some(scanner) = scanner else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if scanner.start_scan() {
        StatusCode::ACCEPTED.into_response()
    } else {
        StatusCode::CONFLICT.into_response()
    }
}

fn header_value(value: impl ToString) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

async fn get_feed(
    _auth: Authorized,
    State(feeds): State<SyncFeedService>,
    Path(entity): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(kind) = EntityKind::from_feed_name(&entity) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let since = parse_watermark(
        headers
            .get(MODIFIED_SINCE_HEADER)
            .and_then(|v| v.to_str().ok()),
    );

    let snapshot = match tokio::task::spawn_blocking(move || feeds.pull(kind, since)).await {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(e)) => {
            error!("Failed to build {} feed: {:#}", kind, e);
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            error!("Feed task failed: {}", e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response_headers.insert(RECORDS_MODIFIED_HEADER, header_value(snapshot.modified));
    response_headers.insert(RECORDS_DELETED_HEADER, header_value(snapshot.deleted));
    response_headers.insert(LAST_MODIFIED_HEADER, header_value(snapshot.watermark));

    let (sender, receiver) = mpsc::channel::<io::Result<axum::body::Bytes>>(FEED_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        let mut writer = ChannelWriter::new(sender);
        if let Err(e) = snapshot.write_body(&mut writer) {
            let gone = e
                .downcast_ref::<io::Error>()
                .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe);
            if gone {
                debug!("Client left while streaming {} feed", snapshot.kind);
            } else {
                warn!("Failed to stream {} feed: {:#}", snapshot.kind, e);
                writer.fail(io::Error::other(e.to_string()));
            }
        }
    });

    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|chunk| (chunk, receiver))
    });
    (response_headers, Body::from_stream(stream)).into_response()
}

pub fn make_app(state: ServerState) -> Router {
    let protected_routes: Router = Router::new()
        .route("/feeds/{entity}", get(get_feed))
        .route("/songs/{id}", get(stream_song))
        .route("/image/{entity}/{size}/{id}", get(get_image))
        .route("/scan", post(start_scan))
        .with_state(state.clone());

    let app: Router = Router::new()
        .route("/info", get(info))
        .with_state(state.clone())
        .merge(protected_routes);

    app.layer(middleware::from_fn_with_state(
        state.config.clone(),
        log_requests,
    ))
}

pub async fn run_server<F>(state: ServerState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = state.config.port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
