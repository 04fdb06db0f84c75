use crate::control::SharedState;
use anyhow::bail;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use warp::Filter;
use warp::http::StatusCode;

const DASHBOARD: &str = include_str!("dashboard.html");

/// How hard to try for the listening socket before giving up.
#[derive(Debug, Clone, Copy)]
pub struct BindPolicy {
    pub attempts: u32,
    pub initial_delay: Duration, // doubled after every failure
}

impl Default for BindPolicy {
    fn default() -> Self {
        Self { attempts: 5, initial_delay: Duration::from_millis(500) }
    }
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    command: String,
    value: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct LogRequest {
    message: Option<String>,
}

fn with_shared(shared: Arc<SharedState>) -> impl Filter<Extract = (Arc<SharedState>,), Error = Infallible> + Clone {
    warp::any().map(move || shared.clone())
}

pub fn routes(
    shared: Arc<SharedState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let index = warp::path::end().and(warp::get()).map(|| warp::reply::html(DASHBOARD));

    let state = warp::path!("api" / "state")
        .and(warp::get())
        .and(with_shared(shared.clone()))
        .map(|shared: Arc<SharedState>| warp::reply::json(&shared.view()));

    let control = warp::path!("api" / "control")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_shared(shared.clone()))
        .and_then(handle_control);

    let log = warp::path!("api" / "log")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_shared(shared))
        .and_then(handle_log);

    index.or(state).or(control).or(log)
}

async fn handle_control(req: ControlRequest, shared: Arc<SharedState>) -> Result<impl warp::Reply, Infallible> {
    match req.command.as_str() {
        "pause" => {
            shared.control.pause();
            shared.log("Training paused by user");
        }
        "resume" => {
            shared.control.resume();
            shared.log("Training resumed by user");
        }
        "stop" => {
            shared.control.stop();
            shared.log("Training stopped by user");
        }
        "speed" => {
            let applied = shared.control.set_speed(req.value.unwrap_or(1.0));
            shared.log(format!("Speed changed to {}x", applied));
        }
        other => {
            let body = json!({ "status": "error", "message": format!("unknown command '{}'", other) });
            return Ok(warp::reply::with_status(warp::reply::json(&body), StatusCode::BAD_REQUEST));
        }
    }
    Ok(warp::reply::with_status(warp::reply::json(&json!({ "status": "ok" })), StatusCode::OK))
}

async fn handle_log(req: LogRequest, shared: Arc<SharedState>) -> Result<impl warp::Reply, Infallible> {
    match req.message.filter(|m| !m.trim().is_empty()) {
        Some(message) => {
            shared.log(message);
            let body = json!({ "status": "ok", "message": "Log added successfully" });
            Ok(warp::reply::with_status(warp::reply::json(&body), StatusCode::OK))
        }
        None => {
            let body = json!({ "status": "error", "message": "No message provided" });
            Ok(warp::reply::with_status(warp::reply::json(&body), StatusCode::BAD_REQUEST))
        }
    }
}

/// Binds the dashboard on localhost and spawns it on the current tokio runtime.
/// A busy port is retried with doubling backoff, then reported as fatal.
pub async fn start(shared: Arc<SharedState>, port: u16, policy: BindPolicy) -> anyhow::Result<SocketAddr> {
    let routes = routes(shared);
    let mut delay = policy.initial_delay;
    for attempt in 1..=policy.attempts {
        match warp::serve(routes.clone()).try_bind_ephemeral(([127, 0, 0, 1], port)) {
            Ok((addr, server)) => {
                tokio::spawn(server);
                info!("dashboard on http://{}", addr);
                return Ok(addr);
            }
            Err(e) => {
                warn!("bind attempt {}/{} on port {} failed: {}", attempt, policy.attempts, port, e);
                if attempt < policy.attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    bail!("could not bind port {} after {} attempts", port, policy.attempts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn index_serves_dashboard() {
        let api = routes(Arc::new(SharedState::new()));
        let res = warp::test::request().method("GET").path("/").reply(&api).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(String::from_utf8_lossy(res.body()).contains("/api/state"));
    }

    #[tokio::test]
    async fn state_reflects_snapshot() {
        let shared = Arc::new(SharedState::new());
        shared.update(true, |s| {
            s.episode = 7;
            s.scores = vec![1.0, 2.0];
        });
        let api = routes(shared);
        let res = warp::test::request().method("GET").path("/api/state").reply(&api).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["episode"], 7);
        assert_eq!(body["scores"], json!([1.0, 2.0]));
        assert_eq!(body["paused"], false);
    }

    #[tokio::test]
    async fn control_commands_drive_flags() {
        let shared = Arc::new(SharedState::new());
        let api = routes(shared.clone());

        let post = |cmd: serde_json::Value| warp::test::request().method("POST").path("/api/control").json(&cmd);
        assert_eq!(post(json!({"command": "pause"})).reply(&api).await.status(), StatusCode::OK);
        assert!(shared.control.is_paused());
        assert_eq!(post(json!({"command": "resume"})).reply(&api).await.status(), StatusCode::OK);
        assert!(!shared.control.is_paused());
        assert_eq!(post(json!({"command": "speed", "value": 3.0})).reply(&api).await.status(), StatusCode::OK);
        assert_eq!(shared.control.speed(), 3.0);
        assert_eq!(post(json!({"command": "jump"})).reply(&api).await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(post(json!({"command": "stop"})).reply(&api).await.status(), StatusCode::OK);
        assert!(!shared.control.is_running());
    }

    #[tokio::test]
    async fn log_requires_message() {
        let shared = Arc::new(SharedState::new());
        let api = routes(shared.clone());
        let res = warp::test::request()
            .method("POST")
            .path("/api/log")
            .json(&json!({"message": "from browser"}))
            .reply(&api)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let res = warp::test::request().method("POST").path("/api/log").json(&json!({})).reply(&api).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let logs = shared.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "from browser");
    }

    #[tokio::test]
    async fn busy_port_fails_after_retries() {
        let shared = Arc::new(SharedState::new());
        let addr = start(shared.clone(), 0, BindPolicy::default()).await.unwrap();
        let quick = BindPolicy { attempts: 2, initial_delay: Duration::from_millis(10) };
        assert!(start(shared, addr.port(), quick).await.is_err());
    }
}
