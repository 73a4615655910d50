// src/modifiers/rewriter.rs
//! Rewriting capability used by the rewrite pipeline
//!
//! `BaseDomainRewriter` maps `<origin-host>.<base_domain>` requests to
//! `<origin-host>` and maps redirects back under the base domain.

use crate::interception::{placeholder_response, request_host, ProxyRequest, ProxyResponse};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use http::uri::Authority;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION};
use hyper::{StatusCode, Uri};
use tracing::debug;

/// Request/response rewriting rules
pub trait Rewriter: Send + Sync {
    /// Rewrite an outgoing request in place
    fn rewrite_request(&self, req: &mut ProxyRequest) -> Result<()>;

    /// Rewrite a response in place
    fn rewrite_response(&self, resp: &mut ProxyResponse) -> Result<()>;

    /// Produce a response for `req` without forwarding it, if the rules
    /// answer it directly
    fn short_circuit(&self, req: &ProxyRequest) -> Result<Option<ProxyResponse>>;
}

/// Rewriter for origins served under a shared base domain
#[derive(Debug, Clone)]
pub struct BaseDomainRewriter {
    base_domain: String,
}

impl BaseDomainRewriter {
    /// Create a rewriter for `base_domain`
    pub fn new(base_domain: impl Into<String>) -> Self {
        let base_domain = base_domain
            .into()
            .trim_matches('.')
            .to_ascii_lowercase();

        Self { base_domain }
    }

    /// Base domain this rewriter serves
    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Origin host encoded in `host`, if it sits under the base domain
    fn origin_host<'a>(&self, host: &'a str) -> Option<&'a str> {
        let host = strip_port(host);
        let suffix_len = self.base_domain.len() + 1;

        if host.len() <= suffix_len {
            return None;
        }

        let (origin, suffix) = host.split_at(host.len() - suffix_len);
        let under_base = suffix.starts_with('.') && suffix[1..].eq_ignore_ascii_case(&self.base_domain);

        under_base.then_some(origin)
    }

    fn is_base_host(&self, host: &str) -> bool {
        strip_port(host).eq_ignore_ascii_case(&self.base_domain)
    }
}

impl Rewriter for BaseDomainRewriter {
    fn rewrite_request(&self, req: &mut ProxyRequest) -> Result<()> {
        let host = request_host(req);
        let Some(origin) = self.origin_host(&host).map(str::to_string) else {
            debug!("{} is not under {}, leaving request as is", host, self.base_domain);
            return Ok(());
        };

        let authority: Authority = origin
            .parse()
            .map_err(|e| EngineError::Rewrite(format!("invalid origin host {}: {}", origin, e)))?;

        if req.uri().authority().is_some() {
            let mut parts = req.uri().clone().into_parts();
            parts.authority = Some(authority);
            *req.uri_mut() = Uri::from_parts(parts)
                .map_err(|e| EngineError::Rewrite(format!("invalid rewritten URI: {}", e)))?;
        }

        let value = HeaderValue::from_str(&origin)
            .map_err(|e| EngineError::Rewrite(format!("invalid Host value {}: {}", origin, e)))?;
        req.headers_mut().insert(HOST, value);

        debug!("Rewrote request host {} -> {}", host, origin);
        Ok(())
    }

    fn rewrite_response(&self, resp: &mut ProxyResponse) -> Result<()> {
        let Some(location) = resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()) else {
            return Ok(());
        };

        let Ok(uri) = location.parse::<Uri>() else {
            return Ok(());
        };

        let Some(host) = uri.host() else {
            // Relative redirects already resolve against the proxied host
            return Ok(());
        };

        if self.is_base_host(host) || self.origin_host(host).is_some() {
            return Ok(());
        }

        let proxied = format!("{}.{}", host, self.base_domain);
        let authority: Authority = proxied
            .parse()
            .map_err(|e| EngineError::Rewrite(format!("invalid proxied host {}: {}", proxied, e)))?;

        let mut parts = uri.into_parts();
        parts.authority = Some(authority);
        let rewritten = Uri::from_parts(parts)
            .map_err(|e| EngineError::Rewrite(format!("invalid rewritten Location: {}", e)))?;

        let value = HeaderValue::from_str(&rewritten.to_string())
            .map_err(|e| EngineError::Rewrite(format!("invalid Location value: {}", e)))?;
        resp.headers_mut().insert(LOCATION, value);

        Ok(())
    }

    fn short_circuit(&self, req: &ProxyRequest) -> Result<Option<ProxyResponse>> {
        if !self.is_base_host(&request_host(req)) {
            return Ok(None);
        }

        let body = Bytes::from(format!(
            "request for {} does not name an origin host\n",
            self.base_domain
        ));

        let mut resp = placeholder_response(StatusCode::NOT_FOUND, req);
        resp.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        resp.headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        *resp.body_mut() = body;

        Ok(Some(resp))
    }
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::{Request, Response};

    fn request(uri: &str) -> ProxyRequest {
        Request::builder().uri(uri).body(Bytes::new()).unwrap()
    }

    #[test]
    fn test_normalizes_base_domain() {
        let rewriter = BaseDomainRewriter::new(".CDN.Test.");
        assert_eq!(rewriter.base_domain(), "cdn.test");
    }

    #[test]
    fn test_rewrites_absolute_request() {
        let rewriter = BaseDomainRewriter::new("cdn.test");
        let mut req = request("https://www.example.com.cdn.test:8443/a.js?v=1");

        rewriter.rewrite_request(&mut req).unwrap();
        assert_eq!(req.uri().to_string(), "https://www.example.com/a.js?v=1");
        assert_eq!(req.headers()[HOST], "www.example.com");
    }

    #[test]
    fn test_rewrites_origin_form_request() {
        let rewriter = BaseDomainRewriter::new("cdn.test");
        let mut req = Request::builder()
            .uri("/a.js")
            .header(HOST, "example.com.cdn.test")
            .body(Bytes::new())
            .unwrap();

        rewriter.rewrite_request(&mut req).unwrap();
        assert_eq!(req.uri().to_string(), "/a.js");
        assert_eq!(req.headers()[HOST], "example.com");
    }

    #[test]
    fn test_foreign_host_untouched() {
        let rewriter = BaseDomainRewriter::new("cdn.test");
        let mut req = request("http://example.org/");

        rewriter.rewrite_request(&mut req).unwrap();
        assert_eq!(req.uri().to_string(), "http://example.org/");
        assert!(req.headers().get(HOST).is_none());
    }

    #[test]
    fn test_lookalike_suffix_untouched() {
        let rewriter = BaseDomainRewriter::new("cdn.test");
        let mut req = request("http://examplecdn.test/");

        rewriter.rewrite_request(&mut req).unwrap();
        assert_eq!(req.uri().host(), Some("examplecdn.test"));
    }

    #[test]
    fn test_rewrites_redirect() {
        let rewriter = BaseDomainRewriter::new("cdn.test");
        let mut resp = Response::new(Bytes::new());
        resp.headers_mut().insert(
            LOCATION,
            HeaderValue::from_static("https://login.example.com/next?x=1"),
        );

        rewriter.rewrite_response(&mut resp).unwrap();
        assert_eq!(
            resp.headers()[LOCATION],
            "https://login.example.com.cdn.test/next?x=1"
        );

        // Already proxied locations are stable
        rewriter.rewrite_response(&mut resp).unwrap();
        assert_eq!(
            resp.headers()[LOCATION],
            "https://login.example.com.cdn.test/next?x=1"
        );
    }

    #[test]
    fn test_relative_redirect_untouched() {
        let rewriter = BaseDomainRewriter::new("cdn.test");
        let mut resp = Response::new(Bytes::new());
        resp.headers_mut()
            .insert(LOCATION, HeaderValue::from_static("/next"));

        rewriter.rewrite_response(&mut resp).unwrap();
        assert_eq!(resp.headers()[LOCATION], "/next");
    }

    #[test]
    fn test_short_circuit_bare_base_domain() {
        let rewriter = BaseDomainRewriter::new("cdn.test");

        let synthesized = rewriter
            .short_circuit(&request("http://cdn.test/"))
            .unwrap()
            .unwrap();
        assert_eq!(synthesized.status(), StatusCode::NOT_FOUND);
        assert!(!synthesized.body().is_empty());

        let passthrough = rewriter
            .short_circuit(&request("http://www.example.com.cdn.test/"))
            .unwrap();
        assert!(passthrough.is_none());
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:443"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("example.com:"), "example.com:");
    }
}
