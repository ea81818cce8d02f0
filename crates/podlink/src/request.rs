//! Request dispatch with bounded retry

use crate::connection::Connection;
use crate::error::SendError;
use crate::response::ApiResponse;
use crate::uri::Scheme;
use crate::{PodlinkError, Result};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, HOST};
use http::{HeaderMap, Method, Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;
use tracing::debug;

/// Request header overriding the API version segment of the path.
///
/// Consumed by the dispatcher, never forwarded.
pub const API_VERSION_HEADER: HeaderName = HeaderName::from_static("api-version");

/// Host used in request URLs when the real address lives in the dialer
const SYNTHETIC_HOST: &str = "d";

/// Characters escaped in a single path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b':')
    .remove(b'=')
    .remove(b'@');

/// A logical request against the versioned API.
///
/// `endpoint` is relative to `/v{version}/libpod` and may contain `{}`
/// placeholders, filled in order from the path values.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    method: Method,
    endpoint: String,
    path_values: Vec<String>,
    query: BTreeMap<String, Vec<String>>,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestOptions {
    /// Request with the given method
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            path_values: Vec::new(),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// `GET` request
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    /// `POST` request
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    /// `DELETE` request
    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::DELETE, endpoint)
    }

    /// Fill the next `{}` placeholder; the value is escaped as one path segment
    pub fn path_value(mut self, value: impl Into<String>) -> Self {
        self.path_values.push(value.into());
        self
    }

    /// Append a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Append a header
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Use `version` in the request path instead of the client's current version
    pub fn api_version(self, version: &str) -> Result<Self> {
        let value = HeaderValue::from_str(version).map_err(http::Error::from)?;
        Ok(self.header(API_VERSION_HEADER, value))
    }

    /// Request body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

impl Connection {
    /// Send `options` to the daemon and return the response envelope.
    ///
    /// Transport failures are retried according to the connection's retry
    /// policy; any HTTP response, whatever its status, ends the loop.
    pub async fn do_request(&self, options: RequestOptions) -> Result<ApiResponse> {
        let request = self.build_request(options)?;
        debug!("DoRequest Method: {} URI: {}", request.method(), request.uri());

        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send(&request).await {
                Ok(response) => return Ok(ApiResponse::new(response, request)),
                Err(e) if attempt < attempts => {
                    debug!("Attempt {}/{} failed: {}", attempt, attempts, e);
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(PodlinkError::Dispatch {
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    fn build_request(&self, options: RequestOptions) -> Result<Request<Bytes>> {
        let RequestOptions {
            method,
            endpoint,
            path_values,
            query,
            mut headers,
            body,
        } = options;

        let version = headers
            .remove(API_VERSION_HEADER)
            .and_then(|v| v.to_str().ok().map(str::to_string))
            .unwrap_or_else(|| self.api.path_segment());
        let path = render_endpoint(&endpoint, &path_values)?;

        let (host, prefix) = match self.uri.scheme() {
            Scheme::Tcp => (self.uri.authority(), self.uri.path().trim_end_matches('/').to_string()),
            _ => (SYNTHETIC_HOST.to_string(), String::new()),
        };
        let mut url = format!("http://{}{}/v{}/libpod{}", host, prefix, version, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&encode_query(&query));
        }

        let mut request = Request::builder().method(method).uri(url).body(body)?;
        let request_headers = request.headers_mut();
        request_headers.extend(headers);
        if !request_headers.contains_key(HOST) {
            request_headers.insert(HOST, HeaderValue::from_str(&host).map_err(http::Error::from)?);
        }
        Ok(request)
    }

    async fn send(&self, request: &Request<Bytes>) -> std::result::Result<Response<Incoming>, SendError> {
        let stream = self.dialer.dial().await.map_err(SendError::Dial)?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection closed with error: {}", e);
            }
        });

        let mut outgoing = Request::new(Full::new(request.body().clone()));
        *outgoing.method_mut() = request.method().clone();
        *outgoing.uri_mut() = origin_form(request.uri());
        *outgoing.headers_mut() = request.headers().clone();
        Ok(sender.send_request(outgoing).await?)
    }
}

/// Substitute escaped path values into the `{}` placeholders of `endpoint`
pub fn render_endpoint(endpoint: &str, values: &[String]) -> Result<String> {
    let placeholders = endpoint.matches("{}").count();
    if placeholders != values.len() {
        return Err(PodlinkError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("{} placeholder(s) for {} path value(s)", placeholders, values.len()),
        });
    }

    let mut pieces = endpoint.split("{}");
    let mut rendered = pieces.next().unwrap_or_default().to_string();
    for (piece, value) in pieces.zip(values) {
        rendered.push_str(&escape_path_value(value));
        rendered.push_str(piece);
    }
    Ok(rendered)
}

/// Escape `value` so it stays a single path segment
pub fn escape_path_value(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}

fn encode_query(query: &BTreeMap<String, Vec<String>>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, values) in query {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

fn origin_form(uri: &Uri) -> Uri {
    uri.path_and_query()
        .map(|pq| Uri::from(pq.clone()))
        .unwrap_or_else(|| Uri::from_static("/"))
}
