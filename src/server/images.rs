//! Artwork at arbitrary sizes.

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{debug, error};

use super::auth::Authorized;
use super::state::GuardedCatalogStore;
use crate::catalog_store::{CatalogStore, EntityKind};
use crate::enrichment::scale_to_fill;

const MAX_IMAGE_SIDE: u32 = 2048;

/// Parses `WxH`, both sides in `1..=2048`.
pub fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    let w = w.parse::<u32>().ok()?;
    let h = h.parse::<u32>().ok()?;
    let valid = |side: u32| (1..=MAX_IMAGE_SIDE).contains(&side);
    (valid(w) && valid(h)).then_some((w, h))
}

/// Returns the stored image of that size, scaling and caching one from the
/// largest stored image if needed.
pub fn load_or_scale(
    store: &dyn CatalogStore,
    kind: EntityKind,
    id: i64,
    width: u32,
    height: u32,
) -> Result<Option<Vec<u8>>> {
    if let Some(data) = store.get_image(kind, id, width, height)? {
        return Ok(Some(data));
    }
    let Some(largest) = store.get_largest_image(kind, id)? else {
        return Ok(None);
    };

    let img = image::load_from_memory(&largest)
        .with_context(|| format!("Stored image of {} {} is unreadable", kind, id))?;
    let scaled = scale_to_fill(&img, width, height)?;
    store.put_image(kind, id, width, height, &scaled)?;
    debug!("Cached {}x{} image of {} {}", width, height, kind, id);
    Ok(Some(scaled))
}

pub async fn get_image(
    _auth: Authorized,
    State(catalog_store): State<GuardedCatalogStore>,
    Path((entity, size, id)): Path<(String, String, i64)>,
) -> Response {
    let kind = match EntityKind::from_feed_name(&entity) {
        Some(kind @ (EntityKind::Artist | EntityKind::Album)) => kind,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    let Some((width, height)) = parse_size(&size) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let loaded = tokio::task::spawn_blocking(move || {
        load_or_scale(catalog_store.as_ref(), kind, id, width, height)
    })
    .await;
    let data = match loaded {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => return StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            error!("Failed to load image of {} {}: {:#}", kind, id, e);
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            error!("Image task failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Some(kind) = infer::get(&data) {
        if kind.mime_type().starts_with("image/") {
            return ([(header::CONTENT_TYPE, kind.mime_type())], data).into_response();
        }
    }
    StatusCode::NOT_FOUND.into_response()
}
