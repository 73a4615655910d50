// src/interception/exchange.rs
//! Exchange types shared by the modifiers, the replay engine and the host
//!
//! Bodies are fully materialised; nothing in this crate streams.

use bytes::Bytes;
use hyper::header::{HeaderValue, HOST};
use hyper::{Method, Request, Response, StatusCode, Uri};
use std::net::SocketAddr;

/// Request as seen by modifiers and the replay engine
pub type ProxyRequest = Request<Bytes>;

/// Response as produced by the replay engine and seen by modifiers
pub type ProxyResponse = Response<Bytes>;

/// Peer address of the client connection, stored in request extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// The request a response was produced for, stored in response extensions
#[derive(Debug, Clone)]
pub struct OriginRequest {
    /// Request method
    pub method: Method,

    /// Request URI as received
    pub uri: Uri,

    /// Request host (authority, including any port)
    pub host: String,
}

impl OriginRequest {
    /// Capture the identifying parts of a request
    pub fn from_request(req: &ProxyRequest) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            host: request_host(req),
        }
    }
}

/// Host of a request: the URI authority, else the `Host` header
pub fn request_host(req: &ProxyRequest) -> String {
    if let Some(authority) = req.uri().authority() {
        return authority.as_str().to_string();
    }

    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Host of the request that produced `resp`, if recorded
pub fn response_origin_host(resp: &ProxyResponse) -> Option<&str> {
    resp.extensions()
        .get::<OriginRequest>()
        .map(|origin| origin.host.as_str())
}

/// Record the originating request on a response
pub fn attach_origin(resp: &mut ProxyResponse, req: &ProxyRequest) {
    resp.extensions_mut().insert(OriginRequest::from_request(req));
}

/// Empty response for `req` with the given status
pub fn placeholder_response(status: StatusCode, req: &ProxyRequest) -> ProxyResponse {
    let mut resp = Response::new(Bytes::new());
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(hyper::header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    attach_origin(&mut resp, req);
    resp
}

/// Copy status, version, headers and body of a response. Extensions are not
/// carried over.
pub fn clone_response(resp: &ProxyResponse) -> ProxyResponse {
    let mut copy = Response::new(resp.body().clone());
    *copy.status_mut() = resp.status();
    *copy.version_mut() = resp.version();
    *copy.headers_mut() = resp.headers().clone();
    copy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_host_from_uri() {
        let req = Request::builder()
            .uri("http://example.com:8080/a.js")
            .header(HOST, "ignored.test")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(request_host(&req), "example.com:8080");
    }

    #[test]
    fn test_request_host_from_header() {
        let req = Request::builder()
            .uri("/a.js")
            .header(HOST, "local.host:3000")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(request_host(&req), "local.host:3000");
    }

    #[test]
    fn test_placeholder_response() {
        let req = Request::builder()
            .uri("http://example.com/missing")
            .body(Bytes::new())
            .unwrap();

        let resp = placeholder_response(StatusCode::NOT_FOUND, &req);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.body().is_empty());
        assert_eq!(response_origin_host(&resp), Some("example.com"));
    }

    #[test]
    fn test_clone_response() {
        let mut resp = Response::new(Bytes::from_static(b"body"));
        *resp.status_mut() = StatusCode::CREATED;
        resp.headers_mut()
            .insert("x-test", HeaderValue::from_static("1"));

        let copy = clone_response(&resp);
        assert_eq!(copy.status(), StatusCode::CREATED);
        assert_eq!(copy.headers()["x-test"], "1");
        assert_eq!(copy.body().as_ref(), b"body");
    }
}
