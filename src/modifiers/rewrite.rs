// src/modifiers/rewrite.rs
//! Rewrite pipeline
//!
//! Applies bypass rules, answers short-circuited requests by hijacking the
//! client connection, and otherwise delegates to the configured `Rewriter`.
//! A pipeline without a rewriter only applies its bypass rules.

use crate::interception::{
    attach_origin, request_host, OriginRequest, ProxyRequest, ProxyResponse, SessionHandle,
};
use crate::modifiers::parse::{fragment, ModifierParser, ModifierScope, ParseResult};
use crate::modifiers::rewriter::{BaseDomainRewriter, Rewriter};
use crate::modifiers::{RequestModifier, ResponseModifier};
use crate::utils::errors::{EngineError, Result};
use hyper::Method;
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use tracing::{debug, info};

/// Host prefix of the bootstrap scripts that are always served untouched
pub const BOOTSTRAP_BYPASS_HOST: &str = "local.host";

/// Condition under which an exchange is left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BypassRule {
    /// Request host starts with this prefix
    HostPrefix(String),

    /// Request uses this method
    Method(Method),
}

impl BypassRule {
    /// Rules every pipeline starts with
    pub fn defaults() -> Vec<BypassRule> {
        vec![
            BypassRule::HostPrefix(BOOTSTRAP_BYPASS_HOST.to_string()),
            BypassRule::Method(Method::CONNECT),
        ]
    }

    /// Whether the rule applies to a request with this method and host
    pub fn matches(&self, method: &Method, host: &str) -> bool {
        match self {
            BypassRule::HostPrefix(prefix) => host.starts_with(prefix.as_str()),
            BypassRule::Method(bypassed) => bypassed == method,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RewritePipelineJson {
    #[serde(default)]
    base_domain: Option<String>,

    #[serde(default)]
    scope: Vec<ModifierScope>,

    #[serde(default)]
    bypass_hosts: Vec<String>,
}

/// Request/response modifier around an optional rewriter
pub struct RewritePipeline {
    rewriter: Option<Arc<dyn Rewriter>>,
    bypass: Vec<BypassRule>,
}

impl RewritePipeline {
    /// Type name of the request-phase pipeline
    pub const REQUEST_TYPE_NAME: &'static str = "reverseproxycdn.request.Modifier";

    /// Type name of the response-phase pipeline
    pub const RESPONSE_TYPE_NAME: &'static str = "reverseproxycdn.response.Modifier";

    /// Create a pipeline with the default bypass rules
    pub fn new(rewriter: Option<Arc<dyn Rewriter>>) -> Self {
        Self {
            rewriter,
            bypass: BypassRule::defaults(),
        }
    }

    /// Add a bypass rule
    pub fn with_bypass(mut self, rule: BypassRule) -> Self {
        self.bypass.push(rule);
        self
    }

    /// Active bypass rules
    pub fn bypass_rules(&self) -> &[BypassRule] {
        &self.bypass
    }

    /// Build the request-phase pipeline from its JSON fragment
    pub fn request_from_json(body: &serde_json::Value, parser: &ModifierParser) -> Result<ParseResult> {
        Self::from_json(Self::REQUEST_TYPE_NAME, ModifierScope::Request, body, parser)
    }

    /// Build the response-phase pipeline from its JSON fragment
    pub fn response_from_json(body: &serde_json::Value, parser: &ModifierParser) -> Result<ParseResult> {
        Self::from_json(Self::RESPONSE_TYPE_NAME, ModifierScope::Response, body, parser)
    }

    fn from_json(
        name: &str,
        phase: ModifierScope,
        body: &serde_json::Value,
        parser: &ModifierParser,
    ) -> Result<ParseResult> {
        let msg: RewritePipelineJson = fragment(name, body)?;

        if let Some(other) = msg.scope.iter().find(|scope| **scope != phase) {
            return Err(EngineError::ConfigParse(format!(
                "{} cannot run in {:?} scope",
                name, other
            )));
        }

        // An explicit base domain gets its own rewriter, otherwise the
        // injected shared one (if any) is used.
        let rewriter: Option<Arc<dyn Rewriter>> = match msg.base_domain.as_deref() {
            Some(base) if !base.is_empty() => Some(Arc::new(BaseDomainRewriter::new(base))),
            _ => parser.context().shared_rewriter.clone(),
        };

        let pipeline = msg
            .bypass_hosts
            .into_iter()
            .fold(Self::new(rewriter), |pipeline, host| {
                pipeline.with_bypass(BypassRule::HostPrefix(host))
            });

        Ok(ParseResult::scoped(Arc::new(pipeline), &[phase]))
    }

    fn bypassed(&self, method: &Method, host: &str) -> bool {
        self.bypass.iter().any(|rule| rule.matches(method, host))
    }

    /// Take over the client connection and answer with `resp`
    fn hijack(req: &ProxyRequest, resp: &ProxyResponse) -> Result<()> {
        let session = req.extensions().get::<SessionHandle>().ok_or_else(|| {
            EngineError::HijackIo(io::Error::new(
                io::ErrorKind::NotConnected,
                "request has no session to hijack",
            ))
        })?;

        let mut conn = session.0.hijack().map_err(EngineError::HijackIo)?;
        conn.write_response(resp).map_err(EngineError::HijackIo)?;
        conn.flush().map_err(EngineError::HijackIo)?;

        Ok(())
    }
}

impl RequestModifier for RewritePipeline {
    fn modify_request(&self, req: &mut ProxyRequest) -> Result<()> {
        let host = request_host(req);
        if self.bypassed(req.method(), &host) {
            debug!("Bypassing rewrite for {} {}", req.method(), host);
            return Ok(());
        }

        let Some(rewriter) = &self.rewriter else {
            return Ok(());
        };

        if let Some(mut synthesized) = rewriter.short_circuit(req)? {
            info!(
                "Short-circuiting {} {} with {}",
                req.method(),
                req.uri(),
                synthesized.status()
            );
            attach_origin(&mut synthesized, req);
            return Self::hijack(req, &synthesized);
        }

        rewriter.rewrite_request(req)
    }
}

impl ResponseModifier for RewritePipeline {
    fn modify_response(&self, resp: &mut ProxyResponse) -> Result<()> {
        if let Some(origin) = resp.extensions().get::<OriginRequest>() {
            if self.bypassed(&origin.method, &origin.host) {
                debug!("Bypassing response rewrite for {}", origin.host);
                return Ok(());
            }
        }

        match &self.rewriter {
            Some(rewriter) => rewriter.rewrite_response(resp),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::{placeholder_response, CapturedSession, Session};
    use bytes::Bytes;
    use hyper::header::{HeaderValue, LOCATION};
    use hyper::{Request, StatusCode};
    use serde_json::json;

    fn request(method: Method, uri: &str) -> ProxyRequest {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::from_static(b"payload"))
            .unwrap()
    }

    fn pipeline() -> RewritePipeline {
        RewritePipeline::new(Some(Arc::new(BaseDomainRewriter::new("cdn.test"))))
    }

    #[test]
    fn test_bootstrap_host_untouched() {
        let pipeline = pipeline();
        let mut req = request(Method::GET, "http://local.host.cdn.test:3000/bootstrap.js");
        let before = format!("{:?}", req);

        pipeline.modify_request(&mut req).unwrap();
        assert_eq!(format!("{:?}", req), before);
    }

    #[test]
    fn test_bootstrap_response_untouched() {
        let pipeline = pipeline();
        let req = request(Method::GET, "http://local.host/bootstrap.js");
        let mut resp = placeholder_response(StatusCode::FOUND, &req);
        resp.headers_mut()
            .insert(LOCATION, HeaderValue::from_static("https://example.com/"));

        pipeline.modify_response(&mut resp).unwrap();
        assert_eq!(resp.headers()[LOCATION], "https://example.com/");
    }

    #[test]
    fn test_connect_untouched() {
        let pipeline = pipeline();
        let mut req = request(Method::CONNECT, "www.example.com.cdn.test:443");

        pipeline.modify_request(&mut req).unwrap();
        assert_eq!(req.uri().host(), Some("www.example.com.cdn.test"));
    }

    #[test]
    fn test_rewrites_request_and_response() {
        let pipeline = pipeline();

        let mut req = request(Method::GET, "http://www.example.com.cdn.test/a.js");
        pipeline.modify_request(&mut req).unwrap();
        assert_eq!(req.uri().host(), Some("www.example.com"));

        let mut resp = placeholder_response(StatusCode::MOVED_PERMANENTLY, &req);
        resp.headers_mut()
            .insert(LOCATION, HeaderValue::from_static("http://m.example.com/a.js"));
        pipeline.modify_response(&mut resp).unwrap();
        assert_eq!(resp.headers()[LOCATION], "http://m.example.com.cdn.test/a.js");
    }

    #[test]
    fn test_short_circuit_hijacks() {
        let pipeline = pipeline();
        let session = CapturedSession::new();

        let mut req = request(Method::GET, "http://cdn.test/");
        req.extensions_mut()
            .insert(SessionHandle(Arc::new(session.clone())));

        pipeline.modify_request(&mut req).unwrap();

        assert!(session.hijacked());
        let served = session.take_response().unwrap();
        assert_eq!(served.status(), StatusCode::NOT_FOUND);
        // The request itself is not rewritten
        assert_eq!(req.uri().host(), Some("cdn.test"));
    }

    #[test]
    fn test_short_circuit_without_session_fails() {
        let pipeline = pipeline();
        let mut req = request(Method::GET, "http://cdn.test/");

        let err = pipeline.modify_request(&mut req).unwrap_err();
        assert!(matches!(err, EngineError::HijackIo(_)));
    }

    #[test]
    fn test_hijack_io_error_propagates() {
        let pipeline = pipeline();
        let session = CapturedSession::new();
        let _taken = session.hijack().unwrap();

        let mut req = request(Method::GET, "http://cdn.test/");
        req.extensions_mut()
            .insert(SessionHandle(Arc::new(session.clone())));

        let err = pipeline.modify_request(&mut req).unwrap_err();
        assert!(matches!(err, EngineError::HijackIo(_)));
    }

    #[test]
    fn test_without_rewriter_is_passthrough() {
        let pipeline = RewritePipeline::new(None);
        let mut req = request(Method::GET, "http://www.example.com.cdn.test/a.js");

        pipeline.modify_request(&mut req).unwrap();
        assert_eq!(req.uri().host(), Some("www.example.com.cdn.test"));
    }

    #[test]
    fn test_from_json_scope_and_bypass() {
        let parser = ModifierParser::default();
        let result = parser
            .parse(&json!({
                "reverseproxycdn.request.Modifier": {
                    "base_domain": "cdn.test",
                    "scope": ["request"],
                    "bypass_hosts": ["static.example.com"]
                }
            }))
            .unwrap();
        assert!(result.response_modifier().is_none());

        let modifier = result.request_modifier().unwrap();

        let mut bypassed = request(Method::GET, "http://static.example.com.cdn.test/x.css");
        modifier.modify_request(&mut bypassed).unwrap();
        assert_eq!(bypassed.uri().host(), Some("static.example.com.cdn.test"));

        let mut rewritten = request(Method::GET, "http://www.example.com.cdn.test/x.css");
        modifier.modify_request(&mut rewritten).unwrap();
        assert_eq!(rewritten.uri().host(), Some("www.example.com"));
    }

    #[test]
    fn test_from_json_rejects_wrong_scope() {
        let parser = ModifierParser::default();
        let result = parser.parse(&json!({
            "reverseproxycdn.request.Modifier": {"base_domain": "cdn.test", "scope": ["response"]}
        }));
        assert!(matches!(result, Err(EngineError::ConfigParse(_))));
    }

    #[test]
    fn test_from_json_uses_shared_rewriter() {
        let parser = ModifierParser::new(crate::modifiers::ParseContext {
            shared_rewriter: Some(Arc::new(BaseDomainRewriter::new("shared.test"))),
        });
        let result = parser
            .parse(&json!({"reverseproxycdn.request.Modifier": {"scope": ["request"]}}))
            .unwrap();

        let mut req = request(Method::GET, "http://example.com.shared.test/");
        result
            .request_modifier()
            .unwrap()
            .modify_request(&mut req)
            .unwrap();
        assert_eq!(req.uri().host(), Some("example.com"));
    }

    #[test]
    fn test_default_rules() {
        let pipeline = RewritePipeline::new(None).with_bypass(BypassRule::Method(Method::OPTIONS));
        assert_eq!(pipeline.bypass_rules().len(), 3);
        assert!(pipeline.bypassed(&Method::OPTIONS, "example.com"));
        assert!(pipeline.bypassed(&Method::GET, "local.host:8080"));
        assert!(!pipeline.bypassed(&Method::GET, "example.com"));
    }
}
