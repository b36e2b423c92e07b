use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::ApiContext;
use shared::{
    domain::{Commission, CommissionId, FileId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        CommissionListItem, LoginRequest, LoginResponse, MessagePayload, SaveDraftRequest,
        SendMessageRequest, ServerEvent, SetFinalPriceRequest, SubmitResponse,
        UpdateStatusRequest, UploadResponse,
    },
};
use storage::Storage;
use tokio::sync::broadcast;
use tracing::{error, info};
use uuid::Uuid;

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    events: broadcast::Sender<ServerEvent>,
    /// External base for download links; links stay relative without it.
    public_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct DraftQuery {
    id: Option<i64>,
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    user_id: i64,
    limit: Option<u32>,
    before: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FileUploadQuery {
    user_id: i64,
    commission_id: Option<i64>,
    filename: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    user_id: i64,
    commission_id: Option<i64>,
}

const MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;
const MAX_FILENAME_BYTES: usize = 180;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext { storage };
    let (events, _) = broadcast::channel(256);

    let state = AppState {
        api,
        events,
        public_url: settings
            .server_public_url
            .as_deref()
            .map(|base| base.trim_end_matches('/').to_string()),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/offers", get(http_list_offers))
        .route("/users/:user_id", get(http_get_user))
        .route("/api/commissions/draft", get(http_fetch_draft))
        .route("/commissions", get(http_list_commissions))
        .route("/admin/commissions", get(http_list_all_commissions))
        .route("/commissions/draft", post(http_save_draft))
        .route("/commissions/submit", post(http_submit))
        .route("/commissions/:commission_id", get(http_get_commission))
        .route("/commissions/:commission_id/status", post(http_update_status))
        .route(
            "/commissions/:commission_id/final_price",
            post(http_set_final_price),
        )
        .route(
            "/commissions/:commission_id/messages",
            get(http_list_messages).post(http_send_message),
        )
        .route("/files/upload", post(upload_file))
        .route("/files/:file_id", get(download_file))
        .route("/ws", get(ws_handler))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            MAX_UPLOAD_BYTES + 1024,
        ))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn api_error(err: ApiError) -> (StatusCode, Json<ApiError>) {
    (status_for(&err.code), Json(err))
}

fn status_for(code: &ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(api_error(ApiError::new(
            ErrorCode::Validation,
            "username cannot be empty",
        )));
    }

    let user_id = state
        .api
        .storage
        .create_user(username)
        .await
        .map_err(|e| api_error(ApiError::new(ErrorCode::Internal, e.to_string())))?;
    let profile = server_api::current_user(&state.api, user_id)
        .await
        .map_err(api_error)?;

    Ok(Json(LoginResponse {
        user_id: profile.id,
        username: profile.username,
        is_admin: profile.is_admin,
    }))
}

async fn http_get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Result<Json<shared::domain::UserProfile>, (StatusCode, Json<ApiError>)> {
    let profile = state
        .api
        .storage
        .get_user(UserId(user_id))
        .await
        .map_err(|e| api_error(ApiError::new(ErrorCode::Internal, e.to_string())))?
        .ok_or_else(|| api_error(ApiError::new(ErrorCode::NotFound, "user not found")))?;
    Ok(Json(profile))
}

async fn http_list_offers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<shared::domain::CommissionOffer>>, (StatusCode, Json<ApiError>)> {
    let offers = server_api::list_offers(&state.api).await.map_err(api_error)?;
    Ok(Json(offers))
}

// The draft hydration endpoint keeps its own `{ "error": ... }` body shape;
// the wizard's cache-miss path parses exactly that.
async fn http_fetch_draft(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DraftQuery>,
) -> Result<Json<shared::domain::CommissionDraft>, (StatusCode, Json<serde_json::Value>)> {
    fn draft_error(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
        (status, Json(serde_json::json!({ "error": message })))
    }

    let Some(user_id) = q.user_id else {
        return Err(draft_error(StatusCode::UNAUTHORIZED, "not signed in"));
    };
    let Some(id) = q.id else {
        return Err(draft_error(StatusCode::BAD_REQUEST, "missing draft id"));
    };

    let draft = server_api::fetch_draft(&state.api, UserId(user_id), CommissionId(id))
        .await
        .map_err(|e| draft_error(status_for(&e.code), &e.message))?;
    Ok(Json(draft))
}

async fn http_list_commissions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<Commission>>, (StatusCode, Json<ApiError>)> {
    let commissions = server_api::list_commissions(&state.api, UserId(q.user_id))
        .await
        .map_err(api_error)?;
    Ok(Json(commissions))
}

async fn http_list_all_commissions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<CommissionListItem>>, (StatusCode, Json<ApiError>)> {
    let commissions = server_api::list_all_commissions(&state.api, UserId(q.user_id))
        .await
        .map_err(api_error)?;
    Ok(Json(commissions))
}

async fn http_save_draft(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveDraftRequest>,
) -> Result<Json<Commission>, (StatusCode, Json<ApiError>)> {
    let saved = server_api::save_draft(&state.api, req.user_id, &req.draft)
        .await
        .map_err(api_error)?;
    Ok(Json(saved))
}

async fn http_submit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveDraftRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<ApiError>)> {
    let submitted = server_api::submit_commission(&state.api, req.user_id, &req.draft)
        .await
        .map_err(api_error)?;
    let _ = state.events.send(ServerEvent::CommissionUpdated {
        commission: submitted.clone(),
    });
    Ok(Json(SubmitResponse {
        commission_id: submitted.id,
        total_price: submitted.total_price,
    }))
}

async fn http_get_commission(
    State(state): State<Arc<AppState>>,
    Path(commission_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Commission>, (StatusCode, Json<ApiError>)> {
    let commission =
        server_api::get_commission(&state.api, UserId(q.user_id), CommissionId(commission_id))
            .await
            .map_err(api_error)?;
    Ok(Json(commission))
}

async fn http_update_status(
    State(state): State<Arc<AppState>>,
    Path(commission_id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Commission>, (StatusCode, Json<ApiError>)> {
    let events = server_api::update_status(
        &state.api,
        req.user_id,
        CommissionId(commission_id),
        req.status,
    )
    .await
    .map_err(api_error)?;

    let mut updated = None;
    for event in events {
        if let ServerEvent::CommissionUpdated { commission } = &event {
            updated = Some(commission.clone());
        }
        let _ = state.events.send(event);
    }
    updated.map(Json).ok_or_else(|| {
        api_error(ApiError::new(
            ErrorCode::Internal,
            "status change produced no update",
        ))
    })
}

async fn http_set_final_price(
    State(state): State<Arc<AppState>>,
    Path(commission_id): Path<i64>,
    Json(req): Json<SetFinalPriceRequest>,
) -> Result<Json<Commission>, (StatusCode, Json<ApiError>)> {
    let event = server_api::set_final_price(
        &state.api,
        req.user_id,
        CommissionId(commission_id),
        req.final_price,
    )
    .await
    .map_err(api_error)?;

    let ServerEvent::CommissionUpdated { commission } = &event else {
        return Err(api_error(ApiError::new(
            ErrorCode::Internal,
            "price change produced no update",
        )));
    };
    let commission = commission.clone();
    let _ = state.events.send(event);
    Ok(Json(commission))
}

async fn http_list_messages(
    State(state): State<Arc<AppState>>,
    Path(commission_id): Path<i64>,
    Query(q): Query<ListMessagesQuery>,
) -> Result<Json<Vec<MessagePayload>>, (StatusCode, Json<ApiError>)> {
    let limit = q.limit.unwrap_or(40).clamp(1, 100);
    let messages = server_api::list_messages(
        &state.api,
        UserId(q.user_id),
        CommissionId(commission_id),
        limit,
        q.before.map(shared::domain::MessageId),
    )
    .await
    .map_err(api_error)?;
    Ok(Json(messages))
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    Path(commission_id): Path<i64>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<ServerEvent>, (StatusCode, Json<ApiError>)> {
    let event = server_api::send_message(
        &state.api,
        req.user_id,
        CommissionId(commission_id),
        req.kind,
        req.content.as_deref(),
        req.file_url.as_deref(),
    )
    .await
    .map_err(api_error)?;
    let _ = state.events.send(event.clone());
    Ok(Json(event))
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    Query(q): Query<FileUploadQuery>,
    body: Bytes,
) -> Result<Json<UploadResponse>, (StatusCode, Json<ApiError>)> {
    if body.is_empty() {
        return Err(api_error(ApiError::new(
            ErrorCode::Validation,
            "upload body cannot be empty",
        )));
    }
    if body.len() > MAX_UPLOAD_BYTES {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ApiError::new(
                ErrorCode::Validation,
                format!("upload exceeds {} bytes", MAX_UPLOAD_BYTES),
            )),
        ));
    }

    let filename = q
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    if let Some(name) = filename {
        if name.len() > MAX_FILENAME_BYTES {
            return Err(api_error(ApiError::new(
                ErrorCode::Validation,
                "filename is too long",
            )));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(api_error(ApiError::new(
                ErrorCode::Validation,
                "filename must not contain path separators",
            )));
        }
    }

    let user = server_api::current_user(&state.api, UserId(q.user_id))
        .await
        .map_err(api_error)?;
    let commission_id = q.commission_id.map(CommissionId);
    if let Some(id) = commission_id {
        server_api::get_commission(&state.api, user.id, id)
            .await
            .map_err(api_error)?;
    }

    let object_key = format!("uploads/{}", Uuid::new_v4());
    let file_id = state
        .api
        .storage
        .store_file(
            user.id,
            commission_id,
            &object_key,
            &body,
            q.mime_type
                .as_deref()
                .filter(|mime| !mime.trim().is_empty()),
            filename,
        )
        .await
        .map_err(|e| api_error(ApiError::new(ErrorCode::Internal, e.to_string())))?;
    let _ = state.events.send(ServerEvent::FileStored { file_id });

    let path = format!("/files/{}", file_id.0);
    let url = match &state.public_url {
        Some(base) => format!("{base}{path}"),
        None => path,
    };
    Ok(Json(UploadResponse {
        file_id,
        url,
        size_bytes: body.len() as u64,
    }))
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let user = server_api::current_user(&state.api, UserId(q.user_id))
        .await
        .map_err(api_error)?;
    let file = state
        .api
        .storage
        .load_file(FileId(file_id))
        .await
        .map_err(|e| api_error(ApiError::new(ErrorCode::Internal, e.to_string())))?
        .ok_or_else(|| api_error(ApiError::new(ErrorCode::NotFound, "file not found")))?;
    if let Some(commission_id) = file.commission_id {
        server_api::get_commission(&state.api, user.id, commission_id)
            .await
            .map_err(api_error)?;
    }

    let mut headers = HeaderMap::new();
    let content_type = file
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(filename) = file.filename {
        if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    Ok((StatusCode::OK, headers, file.data))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    let filter = q.commission_id.map(CommissionId);
    ws.on_upgrade(move |socket| ws_connection(state, socket, UserId(q.user_id), filter))
}

async fn ws_connection(
    state: Arc<AppState>,
    socket: axum::extract::ws::WebSocket,
    _user_id: UserId,
    commission_filter: Option<CommissionId>,
) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            if !event_passes_filter(&event, commission_filter) {
                continue;
            }
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

// Message traffic is scoped to the chat the socket asked for; commission
// and file events always go through.
fn event_passes_filter(event: &ServerEvent, filter: Option<CommissionId>) -> bool {
    let Some(wanted) = filter else {
        return true;
    };
    match event {
        ServerEvent::MessageCreated { message } | ServerEvent::MessageUpdated { message } => {
            message.commission_id == wanted
        }
        _ => true,
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
