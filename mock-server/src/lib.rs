//! Fixture HTTP server for exercising the request builder over real sockets.
//!
//! Serves a small posts API in the shape of a typical public JSON API, plus
//! diagnostic routes that echo requests back or answer with a chosen status.
//! `/delay/{ms}` answers late.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub user_id: u32,
    pub id: u32,
    pub title: String,
    pub body: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub user_id: u32,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub user_id: Option<u32>,
}

/// What `/inspect` saw of a request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Inspection {
    pub method: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

pub type Db = Arc<RwLock<Vec<Post>>>;

pub fn seed() -> Vec<Post> {
    let titles = [
        (1, "sunt aut facere"),
        (1, "qui est esse"),
        (1, "ea molestias quasi"),
        (2, "et ea vero quia"),
        (2, "in quibusdam tempore"),
    ];
    titles
        .iter()
        .zip(1..)
        .map(|(&(user_id, title), id)| Post {
            user_id,
            id,
            title: title.to_string(),
            body: format!("body of post {id}"),
        })
        .collect()
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(seed()));
    Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", get(get_post))
        .route("/echo", any(echo))
        .route("/inspect", any(inspect))
        .route("/status/{code}", any(status))
        .route("/delay/{ms}", any(delay))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_posts(State(db): State<Db>, Query(params): Query<ListParams>) -> Json<Vec<Post>> {
    let posts = db.read().await;
    Json(
        posts
            .iter()
            .filter(|post| params.user_id.map_or(true, |user_id| post.user_id == user_id))
            .cloned()
            .collect(),
    )
}

async fn create_post(
    State(db): State<Db>,
    Json(input): Json<NewPost>,
) -> (StatusCode, Json<Post>) {
    let mut posts = db.write().await;
    let post = Post {
        user_id: input.user_id,
        id: posts.len() as u32 + 1,
        title: input.title,
        body: input.body,
    };
    posts.push(post.clone());
    tracing::debug!(id = post.id, "created post");
    (StatusCode::CREATED, Json(post))
}

async fn get_post(
    State(db): State<Db>,
    Path(id): Path<u32>,
) -> Result<Json<Post>, (StatusCode, Json<Value>)> {
    let posts = db.read().await;
    posts
        .iter()
        .find(|post| post.id == id)
        .cloned()
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))))
}

/// Returns the request body verbatim under the request's content type.
async fn echo(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    ([(header::CONTENT_TYPE, content_type)], body)
}

async fn inspect(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Inspection> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let body = if body.is_empty() {
        None
    } else {
        let text = || Value::String(String::from_utf8_lossy(&body).into_owned());
        Some(serde_json::from_slice(&body).unwrap_or_else(|_| text()))
    };
    Json(Inspection {
        method: method.to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body,
    })
}

async fn status(Path(code): Path<u16>) -> (StatusCode, Json<Value>) {
    match StatusCode::from_u16(code) {
        Ok(status) => (status, Json(json!({ "status": code }))),
        Err(_) => (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid status" }))),
    }
}

/// Sleeps `ms` milliseconds before answering, for exercising client timeouts.
async fn delay(Path(ms): Path<u64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(json!({ "delayed_ms": ms }))
}
