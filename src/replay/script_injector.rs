// src/replay/script_injector.rs
//! Injects a script into replayed HTML pages
//!
//! The script is placed as early in the document as possible: right after
//! the opening `<head>` tag, else after `<html>`, else after a leading
//! doctype, else at the very start of the body.

use crate::interception::{ProxyRequest, ProxyResponse};
use crate::replay::encoding::ContentEncoding;
use crate::replay::transform::ResponseTransformer;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use regex::bytes::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, error, info};

/// Tags after which the script may be inserted, in order of preference
const INSERTION_MARKERS: [&str; 3] = [
    r"(?i)<head(\s[^>]*)?>",
    r"(?i)<html(\s[^>]*)?>",
    r"(?i)\A\s*<!doctype[^>]*>",
];

/// Transformer inserting one `<script>` element into HTML responses
#[derive(Debug)]
pub struct ScriptInjector {
    /// Complete `<script>...</script>` element
    element: Vec<u8>,

    markers: Vec<Regex>,
}

impl ScriptInjector {
    /// Create an injector for the given script source
    pub fn new(source: &str) -> Result<Self> {
        let markers = INSERTION_MARKERS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EngineError::ScriptLoad {
                path: String::from("<inline>"),
                reason: e.to_string(),
            })?;

        Ok(Self {
            element: format!("<script>{}</script>", source).into_bytes(),
            markers,
        })
    }

    /// Load a script from `path`, replacing every key of `replacements`
    /// with its value
    pub fn from_file(path: impl AsRef<Path>, replacements: &HashMap<String, String>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading script from {}", path.display());

        let mut source = std::fs::read_to_string(path).map_err(|e| EngineError::ScriptLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        for (token, value) in replacements {
            source = source.replace(token.as_str(), value);
        }

        Self::new(&source)
    }

    /// Byte offset at which the script goes
    fn insertion_point(&self, html: &[u8]) -> usize {
        self.markers
            .iter()
            .find_map(|marker| marker.find(html))
            .map(|m| m.end())
            .unwrap_or(0)
    }

    fn inject(&self, resp: &mut ProxyResponse) -> Result<()> {
        let stored = resp
            .headers()
            .get(CONTENT_ENCODING)
            .map(|v| v.to_str().unwrap_or("unreadable"))
            .unwrap_or("");
        let encoding = ContentEncoding::from_header(stored)
            .ok_or_else(|| EngineError::Transcode(format!("unsupported Content-Encoding {}", stored)))?;

        let html = encoding.decode(resp.body())?;
        let at = self.insertion_point(&html);

        let mut injected = Vec::with_capacity(html.len() + self.element.len());
        injected.extend_from_slice(&html[..at]);
        injected.extend_from_slice(&self.element);
        injected.extend_from_slice(&html[at..]);

        let encoded = encoding.encode(&injected)?;
        debug!("Injected script at offset {}", at);

        if resp.headers().contains_key(CONTENT_LENGTH) {
            resp.headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from(encoded.len()));
        }
        *resp.body_mut() = Bytes::from(encoded);

        Ok(())
    }
}

impl ResponseTransformer for ScriptInjector {
    fn transform(&self, _req: &ProxyRequest, resp: &mut ProxyResponse) {
        if !is_html(resp) {
            return;
        }

        if let Err(e) = self.inject(resp) {
            error!("Failed to inject script: {}", e);
        }
    }
}

fn is_html(resp: &ProxyResponse) -> bool {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}
