//! Request routing: wake the pool if needed, pick a container, forward
//!
//! Every failure is terminal for its request. Nothing here retries or
//! re-selects.

use crate::config::ControllerMode;
use crate::controller::RequestController;
use crate::error::{json_error_response, ProxyErrorCode};
use crate::pool::Pool;
use crate::upstream::{caused_by_inbound_body, BoxError, InboundBodyError, ProxyBody};
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::header::HOST;
use hyper::{HeaderMap, Request, Response};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::OwnedRwLockReadGuard;
use tracing::{debug, error, warn, Instrument};
use uuid::Uuid;

impl RequestController {
    /// Route one inbound request to a ready container.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<BoxBody<Bytes, hyper::Error>>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!("request", %request_id, method = %req.method(), uri = %req.uri());
        self.route(req).instrument(span).await
    }

    async fn route<B>(&self, req: Request<B>) -> Response<BoxBody<Bytes, hyper::Error>>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        if self.config.mode == ControllerMode::Dynamic && self.pool.read().await.is_dormant() {
            let mut pool = self.pool.write().await;
            debug!(deployment = %self.config.deployment, "Waking dormant pool");
            if let Err(e) = pool.start_all(self.runtime.as_ref()).await {
                error!(deployment = %self.config.deployment, error = %e, "Failed to start container pool");
                return json_error_response(
                    ProxyErrorCode::PoolStartFailed,
                    "Unable to start backend containers",
                );
            }
        }

        // Held until the response body is fully written
        let pool = Arc::clone(&self.pool).read_owned().await;

        let (id, name, address) = match pool.select_ready(self.config.container_amount, self.index_source.as_ref()) {
            Ok(c) => (c.id().to_string(), c.name().to_string(), c.address().to_string()),
            Err(e) => {
                error!(deployment = %self.config.deployment, error = %e, "No container to route to");
                return json_error_response(
                    ProxyErrorCode::NoReadyContainers,
                    "No backend container available",
                );
            }
        };

        let upstream_req = match build_upstream_request(req, &address, self.config.container_port) {
            Ok(r) => r,
            Err(e) => {
                error!(container = %name, error = %e, "Failed to build upstream request");
                return json_error_response(ProxyErrorCode::InternalError, "Invalid request");
            }
        };

        debug!(container = %name, uri = %upstream_req.uri(), "Forwarding request");
        self.touch();

        let response = match self.upstream.send(upstream_req).await {
            Ok(response) => response,
            Err(e) if caused_by_inbound_body(&e) => {
                debug!(container = %name, error = %e, "Request body failed while forwarding");
                return json_error_response(
                    ProxyErrorCode::RequestBodyFailed,
                    "Request body could not be read",
                );
            }
            Err(e) => {
                warn!(container = %name, address = %address, error = %e, "Container failed to serve request");
                pool.mark_dirty(&id);
                return json_error_response(
                    ProxyErrorCode::ConnectionFailed,
                    "Failed to connect to backend",
                );
            }
        };

        let (parts, body) = response.into_parts();
        let mut outbound = Response::new(
            GuardedBody {
                inner: body.boxed(),
                _pool: pool,
            }
            .boxed(),
        );
        *outbound.status_mut() = parts.status;
        copy_headers(outbound.headers_mut(), &parts.headers);
        outbound
    }
}

/// Rewrite the inbound request to target `<address>:<port>`.
///
/// Method, path, query, body and headers carry over. `Host` is left to follow
/// the new target. Body errors are wrapped in [`InboundBodyError`].
pub(crate) fn build_upstream_request<B>(
    req: Request<B>,
    address: &str,
    port: u16,
) -> Result<Request<ProxyBody>, hyper::http::Error>
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = format!("http://{}:{}{}", address, port, path);

    let mut upstream = Request::builder()
        .method(parts.method)
        .uri(uri)
        .body(
            body.map_err(|e| -> BoxError { Box::new(InboundBodyError(e.into())) })
                .boxed(),
        )?;

    let mut headers = parts.headers;
    headers.remove(HOST);
    *upstream.headers_mut() = headers;

    Ok(upstream)
}

/// Append every header from `src` to `dst`; repeated names are kept, never overwritten.
pub(crate) fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src.iter() {
        dst.append(name.clone(), value.clone());
    }
}

/// Response body that keeps the pool's read lock until it is dropped
struct GuardedBody {
    inner: BoxBody<Bytes, hyper::Error>,
    _pool: OwnedRwLockReadGuard<Pool>,
}

impl Body for GuardedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
