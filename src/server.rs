use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use log::{error, info};
use prometheus::Encoder;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth::{create_api_key, init_default_key, with_api_key, AuthError, CreateApiKeyRequest, KeyStore, Permission};
use crate::config::{ConfigError, HostConfig};
use crate::metrics::{init_metrics, record_api_request, Timer, REGISTRY};
use crate::session::{parse_address, CreateSessionRequest, SessionError, SessionManager};

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct MemoryQuery {
    /// Hex, as typed at the monitor.
    pub address: String,
    pub length: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

type Sessions = Arc<SessionManager>;

fn with_sessions(sessions: Sessions) -> impl Filter<Extract = (Sessions,), Error = Infallible> + Clone {
    warp::any().map(move || sessions.clone())
}

fn with_keys(keys: KeyStore) -> impl Filter<Extract = (KeyStore,), Error = Infallible> + Clone {
    warp::any().map(move || keys.clone())
}

fn session_error_status(error: &SessionError) -> StatusCode {
    match error {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::LimitReached(_) => StatusCode::TOO_MANY_REQUESTS,
        SessionError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
    }
}

fn respond<T: Serialize>(
    method: &str,
    endpoint: &str,
    timer: Timer,
    result: Result<T, SessionError>,
) -> warp::reply::WithStatus<warp::reply::Json> {
    let (body, status) = match result {
        Ok(data) => (warp::reply::json(&ApiResponse::success(data)), StatusCode::OK),
        Err(e) => (
            warp::reply::json(&ApiResponse::<()>::error(e.to_string())),
            session_error_status(&e),
        ),
    };
    record_api_request(method, endpoint, status.as_u16(), timer.elapsed());
    warp::reply::with_status(body, status)
}

/// Every API route, with rejections turned into JSON errors.
pub fn api(
    sessions: Sessions,
    keys: KeyStore,
    require_api_key: bool,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    // Open a monitor session
    let create_session = warp::path("session")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_api_key(keys.clone(), Permission::WriteSessions, require_api_key))
        .and(warp::body::json())
        .and(with_sessions(sessions.clone()))
        .and_then(create_session_handler);

    let list_sessions = warp::path("sessions")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_sessions(sessions.clone()))
        .and_then(list_sessions_handler);

    let get_session = warp::path!("session" / String)
        .and(warp::get())
        .and(with_sessions(sessions.clone()))
        .and_then(get_session_handler);

    // Type keys at the monitor
    let input = warp::path!("session" / String / "input")
        .and(warp::post())
        .and(with_api_key(keys.clone(), Permission::WriteSessions, require_api_key))
        .and(warp::body::json())
        .and(with_sessions(sessions.clone()))
        .and_then(input_handler);

    let read_memory = warp::path!("session" / String / "memory")
        .and(warp::get())
        .and(warp::query::<MemoryQuery>())
        .and(with_sessions(sessions.clone()))
        .and_then(read_memory_handler);

    let delete_session = warp::path!("session" / String)
        .and(warp::delete())
        .and(with_api_key(keys.clone(), Permission::WriteSessions, require_api_key))
        .and(with_sessions(sessions.clone()))
        .and_then(delete_session_handler);

    let create_key = warp::path("keys")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_api_key(keys.clone(), Permission::Admin, require_api_key))
        .and(warp::body::json())
        .and(with_keys(keys))
        .and_then(create_key_handler);

    // Metrics endpoint
    let metrics = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(metrics_handler);

    create_session
        .or(list_sessions)
        .or(get_session)
        .or(input)
        .or(read_memory)
        .or(delete_session)
        .or(create_key)
        .or(metrics)
        .recover(handle_rejection)
}

pub async fn run_server(config: HostConfig) -> Result<(), ConfigError> {
    init_metrics();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("bad listen address: {}", e)))?;

    let sessions = Arc::new(SessionManager::new(config.session_machine(), config.server.max_sessions));
    let keys: KeyStore = Arc::new(Mutex::new(HashMap::new()));

    println!("=== wozmon session server ===");
    if config.server.require_api_key {
        let key = init_default_key(&keys);
        println!("Created admin API key: {}", key);
        println!("Use this key in the Authorization header: ApiKey {}", key);
    }

    // CORS
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type", "authorization"])
        .allow_methods(vec!["GET", "POST", "DELETE"]);

    let routes = api(sessions, keys, config.server.require_api_key).with(cors);

    println!("Listening on http://{}", addr);
    println!("API Documentation:");
    println!("  POST   /session              - Open a monitor session");
    println!("  GET    /sessions             - List sessions");
    println!("  GET    /session/:id          - Session state");
    println!("  POST   /session/:id/input    - Type text at the monitor");
    println!("  GET    /session/:id/memory   - Read memory (?address=0300&length=16)");
    println!("  DELETE /session/:id          - Close a session");
    println!("  POST   /keys                 - Create an API key");
    println!("  GET    /metrics              - Prometheus metrics endpoint");
    info!(
        "serving on {} (max {} sessions, {} steps per run)",
        addr, config.server.max_sessions, config.server.max_resident_steps
    );

    warp::serve(routes).run(addr).await;
    Ok(())
}

async fn create_session_handler(request: CreateSessionRequest, sessions: Sessions) -> Result<impl Reply, Rejection> {
    let timer = Timer::new();
    Ok(respond("POST", "/session", timer, sessions.create(request)))
}

async fn list_sessions_handler(sessions: Sessions) -> Result<impl Reply, Rejection> {
    let timer = Timer::new();
    Ok(respond("GET", "/sessions", timer, Ok(sessions.list())))
}

async fn get_session_handler(id: String, sessions: Sessions) -> Result<impl Reply, Rejection> {
    let timer = Timer::new();
    Ok(respond("GET", "/session/:id", timer, sessions.info(&id)))
}

/// Run session work on the blocking pool. Resident code can take a while,
/// and async workers must stay free for other requests.
async fn blocking<T, F>(
    method: &str,
    endpoint: &str,
    timer: Timer,
    work: F,
) -> warp::reply::WithStatus<warp::reply::Json>
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Result<T, SessionError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => respond(method, endpoint, timer, result),
        Err(e) => {
            error!("{} {} failed: {}", method, endpoint, e);
            let status = StatusCode::INTERNAL_SERVER_ERROR;
            record_api_request(method, endpoint, status.as_u16(), timer.elapsed());
            warp::reply::with_status(
                warp::reply::json(&ApiResponse::<()>::error(format!("session task failed: {}", e))),
                status,
            )
        }
    }
}

async fn input_handler(id: String, request: InputRequest, sessions: Sessions) -> Result<impl Reply, Rejection> {
    let timer = Timer::new();
    Ok(blocking("POST", "/session/:id/input", timer, move || {
        sessions.input(&id, &request.text)
    })
    .await)
}

async fn read_memory_handler(id: String, query: MemoryQuery, sessions: Sessions) -> Result<impl Reply, Rejection> {
    let timer = Timer::new();
    let address = match parse_address(&query.address) {
        Ok(address) => address,
        Err(e) => return Ok(respond("GET", "/session/:id/memory", timer, Err::<(), _>(e))),
    };
    let length = query.length.unwrap_or(1);
    Ok(blocking("GET", "/session/:id/memory", timer, move || {
        sessions.read_memory(&id, address, length)
    })
    .await)
}

async fn delete_session_handler(id: String, sessions: Sessions) -> Result<impl Reply, Rejection> {
    let timer = Timer::new();
    let result = sessions.delete(&id).map(|_| format!("Session {} deleted", id));
    Ok(respond("DELETE", "/session/:id", timer, result))
}

async fn create_key_handler(request: CreateApiKeyRequest, keys: KeyStore) -> Result<impl Reply, Rejection> {
    let timer = Timer::new();
    let response = create_api_key(&keys, request);
    record_api_request("POST", "/keys", 200, timer.elapsed());
    Ok(warp::reply::json(&ApiResponse::success(response)))
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    let timer = Timer::new();
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_text) => {
            record_api_request("GET", "/metrics", 200, timer.elapsed());
            Ok(warp::reply::with_header(
                metrics_text,
                "content-type",
                "text/plain; version=0.0.4",
            ))
        }
        Err(_) => {
            record_api_request("GET", "/metrics", 500, timer.elapsed());
            Ok(warp::reply::with_header(
                "Error encoding metrics".to_string(),
                "content-type",
                "text/plain",
            ))
        }
    }
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<AuthError>() {
        let status = match e {
            AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        (status, e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Unhandled rejection: {:?}", err))
    };

    let body = warp::reply::json(&ApiResponse::<()>::error(message));
    Ok(warp::reply::with_status(body, status))
}
