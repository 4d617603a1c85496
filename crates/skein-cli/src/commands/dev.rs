//! `skein dev` command implementation.
//!
//! Serves a project through the core engine: page requests get an HTML
//! shell wiring the runtime and the entry bundle, `/_dev/...` requests get
//! bundles or the runtime itself, and one WebSocket per client carries the
//! HMR watch messages produced by the shared filesystem watcher.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use miette::{IntoDiagnostic, Result};
use skein_core::client;
use skein_core::project::Project;
use skein_core::serve::serve_bundle;
use skein_core::transform::DevTransformer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    /// Project root.
    pub cwd: PathBuf,
    /// Entry module, relative to the root.
    pub entry: PathBuf,
    pub port: u16,
    pub host: String,
}

struct DevState {
    project: Arc<Project>,
    engine: Arc<DevTransformer>,
    /// Broadcast channel feeding every connected HMR socket.
    hmr_tx: broadcast::Sender<String>,
    index_html: String,
}

/// Run the dev server until interrupted.
pub async fn run(action: DevAction) -> Result<()> {
    let cwd = action.cwd.canonicalize().into_diagnostic()?;

    let mut project = Project::new(&cwd);
    project.config = super::load_config(&cwd)?;
    let project = Arc::new(project);

    let entry_path = cwd.join(&action.entry);
    let entry_locator = project
        .locator_from_path(&entry_path, &[])
        .ok_or_else(|| miette::miette!("Entry escapes the project root: {}", action.entry.display()))?;

    let (hmr_tx, _) = broadcast::channel::<String>(16);

    // Fan watch events out to every connected client; entries with no
    // public URL are filtered inside watch_message.
    let watch_project = Arc::clone(&project);
    let watch_tx = hmr_tx.clone();
    let _watch_subscription = project
        .watcher()
        .watch(move |event| {
            let message = skein_core::hmr::watch_message(&watch_project, event);
            if message.changes.is_empty() {
                return;
            }
            let _ = watch_tx.send(serde_json::to_string(&message).unwrap());
        })
        .into_diagnostic()?;

    let state = Arc::new(DevState {
        project,
        engine: Arc::new(DevTransformer::new()),
        hmr_tx,
        index_html: index_html(&entry_locator.url),
    });

    let app = Router::new()
        .route("/_dev/runtime", get(serve_runtime))
        .route("/_dev/ws", get(hmr_websocket))
        .fallback(serve_any)
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", action.host, action.port)
        .parse()
        .into_diagnostic()?;

    info!(%addr, entry = %entry_locator.url, "dev server listening");
    println!("  Dev server running at http://{addr}/");

    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;

    Ok(())
}

/// HTML shell loading the runtime, the entry bundle, and kicking off the
/// entry module.
fn index_html(entry_url: &str) -> String {
    let entry_json = serde_json::to_string(entry_url).unwrap();
    format!(
        "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\"/>\n\
         <script defer src=\"/_dev/runtime\"></script>\n\
         <script defer src=\"{entry_url}\"></script>\n\
         <script defer src=\"data:application/javascript,$skein$.require({entry_json})\"></script>\n\
         </head>\n<body>\n<div id=\"root\"></div>\n</body>\n</html>\n"
    )
}

type AppState = Arc<DevState>;

/// Serve the module runtime (with the HMR client) at `/_dev/runtime`.
async fn serve_runtime() -> impl IntoResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/javascript")
        .header("Cache-Control", "no-cache")
        .body(client::runtime_source_with_hmr())
        .unwrap()
}

/// Everything else: `/_dev/...` URLs are bundles, anything else gets the
/// HTML shell.
async fn serve_any(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path().to_string();

    if !path.starts_with("/_dev/") {
        return Html(state.index_html.clone()).into_response();
    }

    let url = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    match serve_bundle(
        Arc::clone(&state.project),
        Arc::clone(&state.engine) as Arc<dyn skein_core::TransformEngine>,
        &url,
    )
    .await
    {
        Ok(output) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", output.mime_type)
            .header("Cache-Control", "no-cache")
            .body(output.code)
            .unwrap()
            .into_response(),

        Err(error) => {
            warn!(%url, %error, "request failed");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("Content-Type", "application/json")
                .body(serde_json::to_string_pretty(&error).unwrap())
                .unwrap()
                .into_response()
        }
    }
}

/// Upgrade `/_dev/ws` and stream watch messages to the client.
async fn hmr_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_hmr_socket(socket, state))
}

async fn handle_hmr_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.hmr_tx.subscribe();

    loop {
        match rx.recv().await {
            Ok(message) => {
                if socket.send(Message::Text(message)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "HMR client lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
