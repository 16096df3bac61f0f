//! The application-facing request handler seam.
//!
//! Protocol engines (h1 and h2) hand fully-read requests to an
//! [`HttpService`] and write whatever response it produces. Handlers
//! are infallible: failures are expressed as error responses.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{Response, StatusCode, header};

/// A complete in-memory request.
pub type HttpRequest = http::Request<Bytes>;

/// A complete in-memory response.
pub type HttpResponse = http::Response<Bytes>;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An application request handler, dispatched per stream (h2) or per
/// request (h1).
pub trait HttpService: Send + Sync + 'static {
    fn serve(&self, req: HttpRequest) -> BoxFuture<HttpResponse>;
}

impl<S: HttpService + ?Sized> HttpService for Arc<S> {
    fn serve(&self, req: HttpRequest) -> BoxFuture<HttpResponse> {
        self.as_ref().serve(req)
    }
}

/// Create an [`HttpService`] from an async function.
pub fn service_fn<F, Fut>(f: F) -> ServiceFn<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    ServiceFn { f }
}

/// An [`HttpService`] implemented by a function; built via
/// [`service_fn`].
pub struct ServiceFn<F> {
    f: F,
}

impl<F, Fut> HttpService for ServiceFn<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    fn serve(&self, req: HttpRequest) -> BoxFuture<HttpResponse> {
        Box::pin((self.f)(req))
    }
}

/// Plain-text response helper used by built-in endpoints and handlers.
#[must_use]
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    let body = body.into();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(body)
        .expect("static response parts are valid")
}

/// The fallback service: 404 for everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFound;

impl HttpService for NotFound {
    fn serve(&self, req: HttpRequest) -> BoxFuture<HttpResponse> {
        tracing::debug!(path = %req.uri(), "no handler matched");
        Box::pin(async { text_response(StatusCode::NOT_FOUND, "not found\n") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn service_fn_adapts_closures() {
        let svc = service_fn(|req: HttpRequest| async move {
            text_response(StatusCode::OK, format!("hello {}", req.uri().path()))
        });
        let res = svc
            .serve(http::Request::builder().uri("/world").body(Bytes::new()).unwrap())
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(&res.body()[..], b"hello /world");
    }

    #[tokio::test]
    async fn fallback_serves_404() {
        let res = NotFound
            .serve(http::Request::builder().uri("/nope").body(Bytes::new()).unwrap())
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
