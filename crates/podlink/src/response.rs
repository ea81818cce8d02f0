//! Response envelope and status classification

use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;

/// A daemon response paired with the request that produced it.
///
/// Non-2xx statuses are not errors at this layer; callers classify them
/// with the predicates below. Dropping the envelope releases the body.
#[derive(Debug)]
pub struct ApiResponse<B = Incoming> {
    response: Response<B>,
    request: Request<Bytes>,
}

impl<B> ApiResponse<B> {
    /// Pair `response` with `request`
    pub fn new(response: Response<B>, request: Request<Bytes>) -> Self {
        Self { response, request }
    }

    /// Response status
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Response headers
    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// The underlying response
    pub fn response(&self) -> &Response<B> {
        &self.response
    }

    /// The request as dispatched, with its absolute URL
    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// Take the response, dropping the request
    pub fn into_response(self) -> Response<B> {
        self.response
    }

    /// Split into response and request
    pub fn into_parts(self) -> (Response<B>, Request<Bytes>) {
        (self.response, self.request)
    }

    /// 1xx
    pub fn is_informational(&self) -> bool {
        self.status().is_informational()
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    /// 3xx
    pub fn is_redirection(&self) -> bool {
        self.status().is_redirection()
    }

    /// 4xx
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// 409, e.g. removing a running container
    pub fn is_conflict_error(&self) -> bool {
        self.status() == StatusCode::CONFLICT
    }

    /// 5xx
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }
}

impl ApiResponse<Incoming> {
    /// Read the whole body
    pub async fn bytes(self) -> Result<Bytes, hyper::Error> {
        Ok(self.response.into_body().collect().await?.to_bytes())
    }
}
