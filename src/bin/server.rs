//! Codepool server - HTTP surface over the session pools and orchestrator.

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use codepool::config::{
    apply_env_overrides, load_config_from_path, validate_config, Config, LogFormat,
};
use codepool::orchestrator::{BoundUpload, CallerContext, ExecutionRequest, ExecutionResult};
use codepool::process::OsProcessRunner;
use codepool::program::ProgramSource;
use codepool::{Orchestrator, RuntimeKind};
use indexmap::IndexMap;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---- CLI ----

#[derive(Parser)]
#[command(name = "codepool-server", about = "Codepool execution server", version)]
struct Args {
    /// Config file (JSON5 or TOML); defaults to the standard config location
    #[arg(long, short, env = "CODEPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Port
    #[arg(long, short)]
    port: Option<u16>,
}

// ---- App State ----

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

// ---- Error Handling ----

struct AppError(codepool::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            codepool::Error::ProgramNotFound(_) | codepool::Error::SessionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!("Request failed: {}", self.0);
            "Execution failed".to_string()
        } else {
            self.0.to_string()
        };
        let body = Json(serde_json::json!({ "message": message, "error": self.0.kind() }));
        (status, body).into_response()
    }
}

impl From<codepool::Error> for AppError {
    fn from(err: codepool::Error) -> Self {
        AppError(err)
    }
}

// ---- Request Types ----

#[derive(Deserialize)]
struct ExecuteBody {
    /// Inline program text
    #[serde(default)]
    code: Option<String>,
    /// Program path under the programs root
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    runtime: Option<String>,
    #[serde(default)]
    variables: IndexMap<String, String>,
    #[serde(default)]
    preamble: Option<String>,
    #[serde(default)]
    caller: CallerContext,
}

#[derive(Deserialize)]
struct UploadQuery {
    #[serde(rename = "_program")]
    program: String,
    #[serde(rename = "_runtime", default)]
    runtime: Option<String>,
}

// ---- Handlers ----

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": codepool::VERSION,
        "runtimes": state.orchestrator.pools().runtimes(),
    }))
}

async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ExecuteBody>,
) -> Result<Response, AppError> {
    let source = match (body.code, body.program) {
        (Some(code), _) => ProgramSource::Inline(code),
        (None, Some(path)) => ProgramSource::Path(path),
        (None, None) => {
            return Err(codepool::Error::InvalidInput(
                "either code or program is required".to_string(),
            )
            .into())
        }
    };

    let mut request = ExecutionRequest::new(source).with_caller(caller_from(body.caller, &headers));
    request.runtime = parse_runtime(body.runtime.as_deref())?;
    request.variables = body.variables;
    request.preamble = body.preamble;

    let result = state.orchestrator.execute(request).await?;
    Ok(result_response(result))
}

async fn execute_upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let orchestrator = &state.orchestrator;
    let mut request = ExecutionRequest::path(query.program)
        .with_caller(caller_from(CallerContext::default(), &headers));
    request.runtime = parse_runtime(query.runtime.as_deref())?;

    // Bind the session before the body is read so parts land in its directory
    let runtime = orchestrator.resolve(&request).await?.runtime;
    let mut bound = orchestrator.upload_binder().bind(runtime).await?;

    if let Err(e) = read_parts(&mut multipart, &mut bound, &mut request.variables).await {
        orchestrator.release(bound.session()).await;
        return Err(e.into());
    }

    let (request, session) = bound.attach(request);
    let result = orchestrator.execute_in(session, request).await?;
    Ok(result_response(result))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .orchestrator
        .pools()
        .find(&id)
        .ok_or(codepool::Error::SessionNotFound(id))?;
    Ok(Json(session.snapshot()))
}

// ---- Helpers ----

/// Files go to the bound session, other fields become variables
async fn read_parts(
    multipart: &mut Multipart,
    bound: &mut BoundUpload,
    variables: &mut IndexMap<String, String>,
) -> codepool::Result<()> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| codepool::Error::InvalidInput(format!("Malformed multipart body: {}", e)))?;
        let Some(field) = field else {
            return Ok(());
        };

        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                bound.store(&name, &file_name, field).await?;
            }
            None => {
                let value = field.text().await.map_err(|e| {
                    codepool::Error::InvalidInput(format!("Unreadable form field {}: {}", name, e))
                })?;
                variables.insert(name, value);
            }
        }
    }
}

fn parse_runtime(runtime: Option<&str>) -> codepool::Result<Option<RuntimeKind>> {
    runtime
        .filter(|r| !r.trim().is_empty())
        .map(str::parse)
        .transpose()
}

/// Fill in what the body left empty from the HTTP request itself
fn caller_from(mut caller: CallerContext, headers: &HeaderMap) -> CallerContext {
    if caller.server_url.is_empty() {
        if let Some(host) = headers.get("host").and_then(|h| h.to_str().ok()) {
            caller.server_url = format!("http://{}", host);
        }
    }
    if caller.forwarded_headers.is_empty() {
        caller.forwarded_headers = headers
            .iter()
            .filter(|(name, _)| !matches!(name.as_str(), "authorization" | "cookie"))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
    }
    caller
}

fn result_response(result: ExecutionResult) -> Response {
    info!(
        session = %result.session_id,
        runtime = %result.runtime,
        state = %result.state,
        elapsed_ms = result.duration.as_millis() as u64,
        "Execution finished"
    );
    let ExecutionResult {
        response_headers,
        payload,
        ..
    } = result;

    let mut response = Response::new(Body::from(payload.into_bytes()));
    *response.headers_mut() = response_headers;
    response
}

// ---- Router ----

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/execute", post(execute))
        .route("/execute/upload", post(execute_upload))
        .route("/sessions/{id}", get(get_session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---- Main ----

fn init_tracing(config: &Config) {
    let directive = format!(
        "codepool={level},codepool_server={level},tower_http=info",
        level = config.log.level
    );
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| directive.into());

    match config.log.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => {
            let mut config = load_config_from_path(path)?;
            apply_env_overrides(&mut config);
            config
        }
        None => Config::from_env()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config);

    let validation = validate_config(&config);
    for issue in &validation.warnings {
        warn!("Config: {}", issue);
    }
    if !validation.valid {
        for issue in &validation.errors {
            error!("Config: {}", issue);
        }
        anyhow::bail!("invalid configuration");
    }

    tokio::fs::create_dir_all(&config.pool.sessions_dir).await?;

    let orchestrator = Arc::new(Orchestrator::from_config(
        &config,
        Arc::new(OsProcessRunner::new()),
    ));
    info!(runtimes = ?orchestrator.pools().runtimes(), "Session pools configured");

    // Warm up in the background; cold starts of the pre-warmed runtime are slow
    let warming = orchestrator.clone();
    tokio::spawn(async move { warming.start().await });

    let app = build_router(AppState {
        orchestrator: orchestrator.clone(),
    });

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    info!("Codepool listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown().await;
    info!("Sessions released, bye");
    Ok(())
}
