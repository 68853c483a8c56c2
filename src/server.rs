//! The HTTP surface: a JSON API plus an HTML viewer page.

use crate::{
    config::{ConfigError, ConfigStore},
    resolve::Resolver,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use url::Url;

/// Everything the handlers need, shared across requests.
#[derive(Debug)]
pub struct AppState {
    /// The fetch-or-refresh core.
    pub resolver: Resolver,
    /// The tracked-URL store.
    pub config: ConfigStore,
}

/// Build the service router. CORS is wide open, matching the upstream
/// consumers which embed the viewer page from other origins.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/current-url", get(current_url))
        .route("/update-url", post(update_url))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CurrentUrl {
    iframe_url: Url,
}

#[derive(Debug, Serialize)]
struct Updated {
    message: &'static str,
    url: Url,
}

#[derive(Debug, Serialize)]
struct ErrorMessage {
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUrl {
    #[serde(default)]
    new_url: Option<String>,
}

async fn current_url(State(state): State<Arc<AppState>>) -> Response {
    let Some(tracked) = state.config.tracked_url() else {
        return error_response(
            StatusCode::NOT_FOUND,
            "no tracked URL is configured",
        );
    };

    match state.resolver.resolve(&tracked).await {
        Ok(iframe_url) => Json(CurrentUrl { iframe_url }).into_response(),
        Err(e) => {
            log::error!("Extraction failed for \"{}\": {}", tracked, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "unable to resolve the iframe URL",
            )
        },
    }
}

async fn update_url(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpdateUrl>,
) -> Response {
    let Some(new_url) = body.new_url else {
        return error_response(StatusCode::BAD_REQUEST, "\"newUrl\" is required");
    };

    match state.config.set_tracked_url(&new_url) {
        Ok(url) => Json(Updated {
            message: "URL updated",
            url,
        })
        .into_response(),
        Err(e @ (ConfigError::InvalidPrefix | ConfigError::Malformed(_))) => {
            log::warn!("Rejected tracked URL \"{}\": {}", new_url, e);
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        },
        Err(e) => {
            log::error!("Unable to update the tracked URL: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "unable to update the tracked URL",
            )
        },
    }
}

async fn index(State(state): State<Arc<AppState>>) -> Response {
    let resolved = match state.config.tracked_url() {
        Some(tracked) => state
            .resolver
            .resolve(&tracked)
            .await
            .map(|iframe_url| (tracked, iframe_url))
            .map_err(|e| e.to_string()),
        None => Err("no tracked URL is configured".to_string()),
    };

    match resolved {
        Ok((tracked, iframe_url)) => {
            Html(viewer_page(&tracked, &iframe_url)).into_response()
        },
        Err(message) => {
            log::error!("Unable to render the viewer page: {}", message);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(error_page(&message)))
                .into_response()
        },
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorMessage {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn viewer_page(source_url: &Url, iframe_url: &Url) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <title>Rutube iframe</title>
  <style>
    body {{ font-family: sans-serif; padding: 20px; }}
    iframe {{ border: none; margin-top: 10px; }}
  </style>
</head>
<body>
  <h3>Rutube iframe:</h3>
  <iframe src="{iframe_url}" width="800" height="450" allowfullscreen></iframe>
  <p>Video source: <a href="{source_url}" target="_blank">{source_url}</a></p>
</body>
</html>
"#
    )
}

fn error_page(message: &str) -> String {
    format!("<h1>Error: {message}</h1>")
}
