//! HTTP probe implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;

use super::{ProbeError, ProbeStatus, Prober};
use crate::db::MonitorTarget;

/// Timeout applied when a target does not set one.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Probes targets with a single HTTP request from this location.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("uptime-reconciler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &MonitorTarget) -> ProbeStatus {
        let result = run_http_probe(&self.client, target).await;
        if let Err(e) = &result {
            tracing::debug!("HTTP probe for {} failed: {}", target.name, e);
        }
        result.into()
    }
}

/// Run an HTTP probe against the given target.
///
/// Returns latency in milliseconds when the response code is accepted.
pub async fn run_http_probe(
    client: &reqwest::Client,
    target: &MonitorTarget,
) -> Result<u64, ProbeError> {
    let timeout = target
        .timeout
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_PROBE_TIMEOUT);

    let method = Method::from_bytes(target.method.to_uppercase().as_bytes())
        .map_err(|_| ProbeError::Config(format!("unknown method: {}", target.method)))?;

    let mut request = client.request(method, &target.target).timeout(timeout);
    if let Some(headers) = &target.headers {
        for (name, value) in headers {
            request = request.header(name, value);
        }
    }

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    };

    let start = Instant::now();

    let response = request.send().await.map_err(map_err)?;
    let status = response.status();

    // Latency covers the full body.
    response.bytes().await.map_err(map_err)?;
    let latency = start.elapsed().as_millis() as u64;

    let code = status.as_u16();
    let accepted = match &target.expected_codes {
        Some(codes) => codes.contains(&code),
        None => status.is_success(),
    };

    if !accepted {
        let expected = match &target.expected_codes {
            Some(codes) => format!("{:?}", codes),
            None => "2xx".to_string(),
        };
        return Err(ProbeError::UnexpectedStatus {
            expected,
            got: code,
        });
    }

    Ok(latency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let prober = HttpProber::new().unwrap();
        let mut target = MonitorTarget::new("bad", "bad", "http://256.256.256.256");
        target.timeout = Some(100);

        let status = prober.probe(&target).await;
        assert!(!status.ok);
        assert!(!status.error.is_empty());
    }

    #[tokio::test]
    async fn test_http_probe_expected_codes() {
        let base = serve(
            Router::new()
                .route("/ok", get(|| async { "fine" }))
                .route("/missing", get(|| async { StatusCode::NOT_FOUND })),
        )
        .await;
        let prober = HttpProber::new().unwrap();

        let ok = MonitorTarget::new("ok", "ok", &format!("{}/ok", base));
        assert!(prober.probe(&ok).await.ok);

        let missing = MonitorTarget::new("missing", "missing", &format!("{}/missing", base));
        let status = prober.probe(&missing).await;
        assert!(!status.ok);
        assert_eq!(status.error, "Expected codes: 2xx, Got: 404");

        let mut tolerated = missing.clone();
        tolerated.expected_codes = Some(vec![404]);
        assert!(prober.probe(&tolerated).await.ok);
    }

    #[tokio::test]
    async fn test_http_probe_latency_includes_body() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            socket.write_all(b"done").await.unwrap();
            socket.flush().await.unwrap();
        });

        let prober = HttpProber::new().unwrap();
        let target = MonitorTarget::new("slow", "slow", &format!("http://{}/", addr));
        let status = prober.probe(&target).await;
        assert!(status.ok);
        assert!(status.latency_ms >= 300);
    }

    #[tokio::test]
    async fn test_http_probe_unknown_method() {
        let prober = HttpProber::new().unwrap();
        let mut target = MonitorTarget::new("m", "m", "http://127.0.0.1:1/");
        target.method = "NOT A METHOD".to_string();

        let status = prober.probe(&target).await;
        assert!(!status.ok);
        assert!(status.error.contains("unknown method"));
    }
}
