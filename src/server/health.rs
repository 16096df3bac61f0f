//! The `/health` endpoint payload.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{Response, StatusCode, header};
use serde::Serialize;

use crate::server::handler::HttpResponse;

/// Liveness state behind `/health`: `UP` until the graceful-shutdown
/// coordinator marks the process as draining.
#[derive(Debug)]
pub struct HealthState {
    healthy: AtomicBool,
    started: Instant,
    webroot: PathBuf,
}

#[derive(Debug, Serialize)]
struct HealthPayload<'a> {
    status: &'a str,
    timestamp: u64,
    disk: DiskInfo,
    memory: MemoryInfo,
    uptime: u64,
}

#[derive(Debug, Serialize)]
struct DiskInfo {
    webroot: String,
    accessible: bool,
}

#[derive(Debug, Serialize)]
struct MemoryInfo {
    rss_bytes: Option<u64>,
}

impl HealthState {
    #[must_use]
    pub fn new(webroot: PathBuf) -> Self {
        Self {
            healthy: AtomicBool::new(true),
            started: Instant::now(),
            webroot,
        }
    }

    /// Flip the endpoint to `DOWN` / 503. One-way.
    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Render the `/health` response.
    #[must_use]
    pub fn response(&self) -> HttpResponse {
        let healthy = self.is_healthy();
        let payload = HealthPayload {
            status: if healthy { "UP" } else { "DOWN" },
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            disk: DiskInfo {
                webroot: self.webroot.display().to_string(),
                accessible: self.webroot.is_dir(),
            },
            memory: MemoryInfo {
                rss_bytes: memory_rss_bytes(),
            },
            uptime: self.started.elapsed().as_secs(),
        };

        let body = serde_json::to_vec(&payload).unwrap_or_else(|_| b"{}".to_vec());
        Response::builder()
            .status(if healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            })
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(body))
            .expect("static response parts are valid")
    }
}

/// Resident set size, best effort. Only procfs platforms report it.
#[cfg(target_os = "linux")]
fn memory_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(rss_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn memory_rss_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_up_with_the_expected_fields() {
        let state = HealthState::new(PathBuf::from("/"));
        let response = state.response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let payload: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(payload["status"], "UP");
        assert!(payload["timestamp"].as_u64().unwrap() > 0);
        assert!(payload.get("disk").is_some());
        assert!(payload.get("memory").is_some());
        assert!(payload.get("uptime").is_some());
    }

    #[test]
    fn reports_down_after_mark_unhealthy() {
        let state = HealthState::new(PathBuf::from("/"));
        state.mark_unhealthy();
        assert!(!state.is_healthy());

        let response = state.response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let payload: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(payload["status"], "DOWN");
    }
}
