use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::engine::{resolve_user, ConversationEngine};
use crate::providers::CompletionClient;
use crate::sessions::SessionRegistry;
use crate::state::{ChatStore, StoreError};
use crate::tools::ToolDispatcher;
use crate::traits::{ModelProvider, Retriever};
use crate::types::StreamEvent;

const SESSION_COOKIE: &str = "ragsmith_session";

/// Everything needed to mint a new per-session engine, plus the registry
/// the engines live in.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub provider: Arc<dyn ModelProvider>,
    pub retriever: Arc<dyn Retriever>,
    pub model: String,
    pub system_prompt: String,
    pub registry: Arc<Mutex<SessionRegistry>>,
}

impl AppState {
    fn new_engine(&self, user_id: i64) -> ConversationEngine {
        let client = CompletionClient::new(self.provider.clone(), self.model.clone());
        let dispatcher = ToolDispatcher::new(self.retriever.clone());
        ConversationEngine::new(
            client,
            dispatcher,
            self.store.clone(),
            user_id,
            &self.system_prompt,
        )
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/session",
            get(check_session).post(open_session).delete(close_session),
        )
        .route("/api/tools", get(list_tools))
        .route("/api/chats", get(list_chats))
        .route("/api/chats/{chat_id}/load", post(load_chat))
        .route("/api/prompt", post(prompt))
        .route("/api/prompt/stream", post(prompt_stream))
        .with_state(state)
}

fn session_id_from(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Look up the engine for the request's session cookie.
async fn session_engine(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Arc<Mutex<ConversationEngine>>, StatusCode> {
    let session_id = session_id_from(headers).ok_or(StatusCode::UNAUTHORIZED)?;
    state
        .registry
        .lock()
        .await
        .get(&session_id)
        .ok_or(StatusCode::UNAUTHORIZED)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn list_users(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_users().await {
        Ok(users) => {
            let users: Vec<_> = users
                .into_iter()
                .map(|(id, name)| json!({"id": id, "user_name": name}))
                .collect();
            Json(json!({"users": users})).into_response()
        }
        Err(e) => {
            error!("Failed to list users: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
struct UserRequest {
    user_name: String,
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> impl IntoResponse {
    match state.store.create_user(&req.user_name).await {
        Ok(id) => (StatusCode::CREATED, Json(json!({"id": id}))).into_response(),
        Err(StoreError::UserAlreadyExists(name)) => (
            StatusCode::CONFLICT,
            Json(json!({"error": format!("User '{}' already exists", name)})),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to create user: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Select a user and issue a session cookie bound to a fresh engine.
async fn open_session(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> impl IntoResponse {
    let user_id = match resolve_user(&state.store, &req.user_name).await {
        Ok(id) => id,
        Err(StoreError::UserNotFound(name)) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("User '{}' not found", name)})),
            )
                .into_response();
        }
        Err(e) => {
            error!("Failed to resolve user: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let engine = state.new_engine(user_id);
    state
        .registry
        .lock()
        .await
        .insert(session_id.clone(), engine);
    info!(user_id, "Opened session");

    let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, session_id);
    (
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(json!({"session_id": session_id})),
    )
        .into_response()
}

/// The tools a prompt request may name.
async fn list_tools() -> Json<serde_json::Value> {
    let tools: Vec<_> = crate::tools::TOOLS
        .iter()
        .map(|t| json!({"name": t.name, "description": t.description}))
        .collect();
    Json(json!({"tools": tools}))
}

/// Tells the front end whether its cookie still maps to a live session.
async fn check_session(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let alive = match session_id_from(&headers) {
        Some(session_id) => state.registry.lock().await.has(&session_id),
        None => false,
    };
    Json(json!({"alive": alive}))
}

async fn close_session(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(session_id) = session_id_from(&headers) {
        state.registry.lock().await.remove(&session_id);
    }
    StatusCode::NO_CONTENT
}

async fn list_chats(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let engine = match session_engine(&state, &headers).await {
        Ok(engine) => engine,
        Err(status) => return status.into_response(),
    };
    let user_id = engine.lock().await.user_id();

    match state.store.get_chats(user_id).await {
        Ok(chats) => {
            let chats: Vec<_> = chats
                .into_iter()
                .map(|c| json!({"id": c.id, "slug": c.slug}))
                .collect();
            Json(json!({"chats": chats})).into_response()
        }
        Err(e) => {
            error!("Failed to list chats: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn load_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let engine = match session_engine(&state, &headers).await {
        Ok(engine) => engine,
        Err(status) => return status.into_response(),
    };

    let mut engine = engine.lock().await;
    match engine.load_chat(chat_id).await {
        Ok(()) => Json(json!({
            "chat_id": chat_id,
            "slug": engine.chat().slug(),
            "messages": engine.chat().messages(),
        }))
        .into_response(),
        Err(StoreError::ChatNotFound(id)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Chat {} not found", id)})),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to load chat: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
struct PromptRequest {
    prompt: String,
    #[serde(default)]
    tools: Vec<String>,
}

async fn prompt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PromptRequest>,
) -> impl IntoResponse {
    let engine = match session_engine(&state, &headers).await {
        Ok(engine) => engine,
        Err(status) => return status.into_response(),
    };

    let mut engine = engine.lock().await;
    match engine.process_prompt(&req.prompt, &req.tools).await {
        Ok(answer) => Json(json!({
            "chat_id": engine.chat().id,
            "answer": answer,
        }))
        .into_response(),
        Err(e) => {
            error!("Prompt processing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Streaming variant: turns the engine's event channel into SSE.
async fn prompt_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PromptRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, StatusCode> {
    let engine = session_engine(&state, &headers).await?;

    let (tx, rx) = mpsc::channel::<StreamEvent>(32);
    tokio::spawn(async move {
        let mut engine = engine.lock().await;
        if let Err(e) = engine
            .process_prompt_streaming(&req.prompt, &req.tools, tx)
            .await
        {
            error!("Streaming prompt failed: {}", e);
        }
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse_event = Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}"));
        Some((Ok(sse_event), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
