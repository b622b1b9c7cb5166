//! HTTP request handlers

use super::server::AppContext;
use crate::error::Error;
use crate::playback::{library, PlaybackStatus, PlayerSettings};
use crate::registry::TagEntry;
use crate::sink::{DeviceInfo, SinkDevice, SinkLinkState};
use crate::state::ReaderHealthSnapshot;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jukebox_common::{MacAddress, TagUid};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

// ============================================================================
// Errors
// ============================================================================

/// Error response wrapper: `{ "status": "error", "error": "<message>" }`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) | Error::MediaNotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NoSinkAvailable => StatusCode::CONFLICT,
            Error::Adapter(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        let body = ErrorResponse {
            status: "error",
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_uid(raw: &str) -> Result<TagUid, Error> {
    raw.parse()
        .map_err(|e| Error::BadRequest(format!("invalid tag uid {:?}: {}", raw, e)))
}

fn parse_mac(raw: &str) -> Result<MacAddress, Error> {
    raw.parse()
        .map_err(|e| Error::BadRequest(format!("invalid device address {:?}: {}", raw, e)))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub playback: PlaybackStatus,
    pub sink: SinkLinkState,
    pub reader: ReaderHealthSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct MediaRequest {
    pub media_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ScanTagResponse {
    pub uid: Option<TagUid>,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub stopped: bool,
}

#[derive(Debug, Serialize)]
pub struct TracksResponse {
    pub tracks: Vec<PathBuf>,
}

const DEFAULT_TAG_SCAN_SECS: u64 = 10;
const MAX_TAG_SCAN_SECS: u64 = 60;

// ============================================================================
// Health and status
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "jukebox-ap".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /status - playback, link and reader state in one document
pub async fn status(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    Json(StatusResponse {
        playback: ctx.controller.status().await,
        sink: ctx.sink.current_link_state().await,
        reader: ctx.state.reader.snapshot(),
    })
}

// ============================================================================
// Tag registry
// ============================================================================

/// GET /tags
pub async fn list_tags(State(ctx): State<AppContext>) -> Json<Vec<TagEntry>> {
    Json(ctx.registry.all().await)
}

/// PUT /tags/:uid - bind a tag to a track (replaces any existing binding)
pub async fn register_tag(
    State(ctx): State<AppContext>,
    Path(uid): Path<String>,
    Json(req): Json<MediaRequest>,
) -> ApiResult<Json<TagEntry>> {
    let uid = parse_uid(&uid)?;
    if req.media_path.as_os_str().is_empty() {
        return Err(Error::BadRequest("media_path must not be empty".to_string()).into());
    }
    let media_path = ctx.resolve_media(req.media_path);

    ctx.registry.register(uid.clone(), media_path.clone()).await?;
    Ok(Json(TagEntry { uid, media_path }))
}

/// DELETE /tags/:uid - 204 whether or not the tag was bound
pub async fn unregister_tag(
    State(ctx): State<AppContext>,
    Path(uid): Path<String>,
) -> ApiResult<StatusCode> {
    let uid = parse_uid(&uid)?;
    ctx.registry.unregister(&uid).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /tags/scan?timeout_secs= - wait for the next presented token
pub async fn scan_tag(
    State(ctx): State<AppContext>,
    Query(query): Query<ScanQuery>,
) -> Json<ScanTagResponse> {
    let secs = query
        .timeout_secs
        .unwrap_or(DEFAULT_TAG_SCAN_SECS)
        .clamp(1, MAX_TAG_SCAN_SECS);
    info!(timeout_secs = secs, "Waiting for a token");

    let uid = ctx.state.await_next_token(Duration::from_secs(secs)).await;
    Json(ScanTagResponse { uid })
}

// ============================================================================
// Playback
// ============================================================================

/// POST /playback/play
pub async fn play(
    State(ctx): State<AppContext>,
    Json(req): Json<MediaRequest>,
) -> ApiResult<Json<PlaybackStatus>> {
    if req.media_path.as_os_str().is_empty() {
        return Err(Error::BadRequest("media_path must not be empty".to_string()).into());
    }
    let media_path = ctx.resolve_media(req.media_path);
    info!(media = %media_path.display(), "Play request");

    ctx.controller.play(media_path).await?;
    Ok(Json(ctx.controller.status().await))
}

/// POST /playback/stop
pub async fn stop(State(ctx): State<AppContext>) -> Json<StopResponse> {
    Json(StopResponse {
        stopped: ctx.controller.stop().await,
    })
}

/// GET /tracks
pub async fn list_tracks(State(ctx): State<AppContext>) -> ApiResult<Json<TracksResponse>> {
    let tracks = library::list_tracks(&ctx.music_dir)?;
    Ok(Json(TracksResponse { tracks }))
}

/// GET /settings
pub async fn get_settings(State(ctx): State<AppContext>) -> Json<PlayerSettings> {
    Json(ctx.settings.get().await)
}

/// PUT /settings
pub async fn update_settings(
    State(ctx): State<AppContext>,
    Json(settings): Json<PlayerSettings>,
) -> ApiResult<Json<PlayerSettings>> {
    Ok(Json(ctx.settings.update(settings).await?))
}

// ============================================================================
// Sink management
// ============================================================================

/// GET /sink
pub async fn link_state(State(ctx): State<AppContext>) -> Json<SinkLinkState> {
    Json(ctx.sink.current_link_state().await)
}

/// POST /sink/scan
pub async fn scan_sinks(State(ctx): State<AppContext>) -> ApiResult<Json<Vec<SinkDevice>>> {
    Ok(Json(ctx.sink.scan().await?))
}

/// POST /sink/:mac/pair
pub async fn pair(
    State(ctx): State<AppContext>,
    Path(mac): Path<String>,
) -> ApiResult<Json<SinkLinkState>> {
    ctx.sink.pair(parse_mac(&mac)?).await?;
    Ok(Json(ctx.sink.current_link_state().await))
}

/// POST /sink/:mac/connect
pub async fn connect(
    State(ctx): State<AppContext>,
    Path(mac): Path<String>,
) -> ApiResult<Json<SinkLinkState>> {
    ctx.sink.connect(parse_mac(&mac)?).await?;
    Ok(Json(ctx.sink.current_link_state().await))
}

/// POST /sink/:mac/disconnect
pub async fn disconnect(
    State(ctx): State<AppContext>,
    Path(mac): Path<String>,
) -> ApiResult<Json<SinkLinkState>> {
    ctx.sink.disconnect(parse_mac(&mac)?).await?;
    Ok(Json(ctx.sink.current_link_state().await))
}

/// POST /sink/:mac/trust
pub async fn trust(
    State(ctx): State<AppContext>,
    Path(mac): Path<String>,
) -> ApiResult<Json<SinkLinkState>> {
    ctx.sink.trust(parse_mac(&mac)?).await?;
    Ok(Json(ctx.sink.current_link_state().await))
}

/// POST /sink/:mac/remove
pub async fn remove(
    State(ctx): State<AppContext>,
    Path(mac): Path<String>,
) -> ApiResult<Json<SinkLinkState>> {
    ctx.sink.remove(parse_mac(&mac)?).await?;
    Ok(Json(ctx.sink.current_link_state().await))
}

/// GET /sink/:mac/info
pub async fn device_info(
    State(ctx): State<AppContext>,
    Path(mac): Path<String>,
) -> ApiResult<Json<DeviceInfo>> {
    Ok(Json(ctx.sink.info(parse_mac(&mac)?).await?))
}

/// PUT /sink/:mac/auto-connect
pub async fn enable_auto_connect(
    State(ctx): State<AppContext>,
    Path(mac): Path<String>,
) -> ApiResult<Json<SinkLinkState>> {
    ctx.sink.set_auto_connect(parse_mac(&mac)?, true).await?;
    Ok(Json(ctx.sink.current_link_state().await))
}

/// DELETE /sink/:mac/auto-connect
pub async fn disable_auto_connect(
    State(ctx): State<AppContext>,
    Path(mac): Path<String>,
) -> ApiResult<Json<SinkLinkState>> {
    ctx.sink.set_auto_connect(parse_mac(&mac)?, false).await?;
    Ok(Json(ctx.sink.current_link_state().await))
}

/// PUT /sink/preferred/:mac
pub async fn set_preferred(
    State(ctx): State<AppContext>,
    Path(mac): Path<String>,
) -> ApiResult<Json<SinkLinkState>> {
    ctx.sink.set_preferred(Some(parse_mac(&mac)?)).await?;
    Ok(Json(ctx.sink.current_link_state().await))
}

/// DELETE /sink/preferred
pub async fn clear_preferred(State(ctx): State<AppContext>) -> ApiResult<Json<SinkLinkState>> {
    ctx.sink.set_preferred(None).await?;
    Ok(Json(ctx.sink.current_link_state().await))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (Error::NoSinkAvailable, StatusCode::CONFLICT),
            (Error::Adapter("x".into()), StatusCode::BAD_GATEWAY),
            (Error::ChannelClosed("sink manager"), StatusCode::INTERNAL_SERVER_ERROR),
            (
                Error::MediaNotFound(PathBuf::from("/music/x.mp3")),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status_code(), expected);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_uid("zz"), Err(Error::BadRequest(_))));
        assert!(matches!(parse_mac("not-a-mac"), Err(Error::BadRequest(_))));
        assert!(parse_mac("aa-bb-cc-dd-ee-ff").is_ok());
    }
}
