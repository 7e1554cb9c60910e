//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fpmgate::runtime::{ContainerDetails, ContainerRuntime};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

/// Runtime whose containers live on loopback addresses.
///
/// Every container reports `127.0.0.1` unless an address was assigned to its
/// name with [`LoopbackRuntime::assign`].
#[derive(Default)]
pub struct LoopbackRuntime {
    addresses: Mutex<HashMap<String, String>>,
    failing_starts: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    start_delay: Mutex<Duration>,
}

impl LoopbackRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `address` for the container created with `name`
    pub fn assign(&self, name: &str, address: &str) {
        self.addresses
            .lock()
            .insert(format!("id-{}", name), address.to_string());
    }

    pub fn fail_start(&self, name: &str) {
        self.failing_starts.lock().insert(format!("id-{}", name));
    }

    pub fn heal_start(&self, name: &str) {
        self.failing_starts.lock().remove(&format!("id-{}", name));
    }

    /// Make every start call take `delay`
    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock() = delay;
    }

    pub fn calls_for(&self, op: &str) -> Vec<String> {
        let prefix = format!("{} ", op);
        self.calls
            .lock()
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(String::from))
            .collect()
    }

    fn record(&self, op: &str, target: &str) {
        self.calls.lock().push(format!("{} {}", op, target));
    }
}

#[async_trait]
impl ContainerRuntime for LoopbackRuntime {
    async fn create_container(
        &self,
        name: &str,
        _image: &str,
        _deployment: &str,
    ) -> anyhow::Result<String> {
        self.record("create", name);
        Ok(format!("id-{}", name))
    }

    async fn start_container(&self, id: &str) -> anyhow::Result<()> {
        self.record("start", id);
        let delay = *self.start_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing_starts.lock().contains(id) {
            anyhow::bail!("container {} exited during start", id);
        }
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> anyhow::Result<ContainerDetails> {
        self.record("inspect", id);
        let ip_address = self
            .addresses
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_else(|| "127.0.0.1".to_string());
        Ok(ContainerDetails {
            ip_address,
            running: true,
        })
    }

    async fn stop_container(&self, id: &str) -> anyhow::Result<()> {
        self.record("stop", id);
        Ok(())
    }

    async fn kill_container(&self, id: &str) -> anyhow::Result<()> {
        self.record("kill", id);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> anyhow::Result<()> {
        self.record("remove", id);
        Ok(())
    }
}

/// Start an HTTP backend on `127.0.0.1:0` and return its address.
///
/// It answers every request with `<METHOD> <path?query> host=<Host>` followed
/// by the request body, echoes `x-test` back, and sets two `set-cookie` headers.
pub async fn spawn_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let service = service_fn(echo);
                let _ = AutoBuilder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

async fn echo(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let host = parts
        .headers
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let payload = body
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();

    let mut text = format!("{} {} host={}\n", parts.method, target, host).into_bytes();
    text.extend_from_slice(&payload);

    let mut response = Response::builder()
        .status(200)
        .header("set-cookie", "session=abc")
        .header("set-cookie", "theme=dark")
        .header("x-backend", "echo");
    if let Some(value) = parts.headers.get("x-test") {
        response = response.header("x-test", value.clone());
    }
    Ok(response.body(Full::new(Bytes::from(text))).unwrap())
}

/// A port on 127.0.0.1 with nothing listening
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
