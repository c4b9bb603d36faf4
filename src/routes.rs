use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{multipart::Multipart, rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::db::{Episode, Feed};
use crate::error::Error;
use crate::library::Library;
use crate::search::{SearchClient, SearchResult};

const EPISODES_PER_PAGE: i64 = 5;

pub struct AppState {
    pub library: Arc<Library>,
    pub search: Arc<SearchClient>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/add_by_rss", post(add_by_rss))
        .route("/api/favorites", get(favorites))
        .route("/api/podcast/:feed_id/episodes", get(episodes))
        .route("/api/delete_podcast/*feed_id", delete(delete_podcast))
        .route("/api/search_podcasts", get(search_podcasts))
        .route("/api/import_opml", post(import_opml))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub page_size: i64,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::MissingInput(_) | Error::InvalidFeed(_) => StatusCode::BAD_REQUEST,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::FeedUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::Upstream(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn index() -> impl IntoResponse {
    HtmlTemplate(IndexTemplate {
        page_size: EPISODES_PER_PAGE,
    })
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}

#[derive(Deserialize)]
pub struct AddByRssRequest {
    pub rss_url: Option<String>,
}

pub async fn add_by_rss(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AddByRssRequest>, JsonRejection>,
) -> Result<impl IntoResponse, Error> {
    let rss_url = payload
        .ok()
        .and_then(|Json(body)| body.rss_url)
        .filter(|url| !url.trim().is_empty())
        .ok_or(Error::MissingInput("rss_url"))?;

    let feed = state.library.subscribe(&rss_url).await?;

    Ok(Json(json!({
        "message": "Added from RSS",
        "title": feed.title,
    })))
}

pub async fn favorites(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Feed>>, Error> {
    Ok(Json(state.library.feeds().await?))
}

#[derive(Deserialize)]
pub struct EpisodesQuery {
    #[serde(default)]
    pub offset: i64,
}

pub async fn episodes(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<String>,
    Query(query): Query<EpisodesQuery>,
) -> Result<Json<Vec<Episode>>, Error> {
    let episodes = state
        .library
        .episodes(&feed_id, query.offset, EPISODES_PER_PAGE)
        .await?;
    Ok(Json(episodes))
}

pub async fn delete_podcast(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let feed_id = feed_id.trim_start_matches('/');
    state.library.unsubscribe(feed_id).await?;
    Ok(Json(json!({ "message": "Deleted" })))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn search_podcasts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchResult>>, Error> {
    Ok(Json(state.search.search(&query.q).await?))
}

pub async fn import_opml(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, Error> {
    let mut document = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Upstream(format!("Invalid upload: {}", e)))?
    {
        if field.name() == Some("file") {
            let text = field
                .text()
                .await
                .map_err(|e| Error::Upstream(format!("Invalid upload: {}", e)))?;
            document = Some(text);
            break;
        }
    }

    let document = document.ok_or_else(|| Error::Upstream("No OPML file uploaded".to_string()))?;
    let summary = state.library.import_opml(&document).await?;

    Ok(Json(json!({
        "message": format!("Imported {} of {} podcasts", summary.imported, summary.total),
    })))
}
