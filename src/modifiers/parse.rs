// src/modifiers/parse.rs
//! JSON modifier documents
//!
//! A document is an object with a single key naming a registered modifier
//! type; its value is that type's configuration:
//!
//! ```json
//! {"fifo.Group": {"scope": ["request", "response"], "modifiers": [
//!     {"reverseproxycdn.request.Modifier": {"base_domain": "cdn.test", "scope": ["request"]}},
//!     {"reverseproxycdn.response.Modifier": {"base_domain": "cdn.test", "scope": ["response"]}}
//! ]}}
//! ```

use crate::modifiers::group::ModifierGroup;
use crate::modifiers::rewrite::RewritePipeline;
use crate::modifiers::rewriter::Rewriter;
use crate::modifiers::{RequestModifier, ResponseModifier};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Processing phase a modifier applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifierScope {
    Request,
    Response,
}

impl ModifierScope {
    /// Scope used when a fragment does not name one
    pub fn all() -> Vec<ModifierScope> {
        vec![ModifierScope::Request, ModifierScope::Response]
    }
}

/// Modifiers produced from one document fragment
#[derive(Default)]
pub struct ParseResult {
    request: Option<Arc<dyn RequestModifier>>,
    response: Option<Arc<dyn ResponseModifier>>,
}

impl ParseResult {
    /// Result for a modifier that handles both phases, restricted to `scope`.
    /// An empty scope means both phases.
    pub fn scoped<M>(modifier: Arc<M>, scope: &[ModifierScope]) -> Self
    where
        M: RequestModifier + ResponseModifier + 'static,
    {
        let all = ModifierScope::all();
        let scope = if scope.is_empty() { &all[..] } else { scope };

        let request: Option<Arc<dyn RequestModifier>> = scope
            .contains(&ModifierScope::Request)
            .then(|| Arc::clone(&modifier) as Arc<dyn RequestModifier>);
        let response: Option<Arc<dyn ResponseModifier>> = scope
            .contains(&ModifierScope::Response)
            .then(|| modifier as Arc<dyn ResponseModifier>);

        Self { request, response }
    }

    /// Request modifier, if the scope included requests
    pub fn request_modifier(&self) -> Option<Arc<dyn RequestModifier>> {
        self.request.clone()
    }

    /// Response modifier, if the scope included responses
    pub fn response_modifier(&self) -> Option<Arc<dyn ResponseModifier>> {
        self.response.clone()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Option<Arc<dyn RequestModifier>>,
        Option<Arc<dyn ResponseModifier>>,
    ) {
        (self.request, self.response)
    }
}

/// Dependencies handed to modifier constructors
#[derive(Clone, Default)]
pub struct ParseContext {
    /// Rewriter used by pipelines that do not name a base domain
    pub shared_rewriter: Option<Arc<dyn Rewriter>>,
}

/// Constructor for one registered modifier type
pub type ParseFn = fn(&serde_json::Value, &ModifierParser) -> Result<ParseResult>;

/// Table of modifier type names
pub struct ModifierParser {
    parsers: HashMap<&'static str, ParseFn>,
    context: ParseContext,
}

impl ModifierParser {
    /// Create a parser with the built-in types registered
    pub fn new(context: ParseContext) -> Self {
        let mut parser = Self {
            parsers: HashMap::new(),
            context,
        };

        parser.register(ModifierGroup::TYPE_NAME, ModifierGroup::from_json);
        parser.register(RewritePipeline::REQUEST_TYPE_NAME, RewritePipeline::request_from_json);
        parser.register(RewritePipeline::RESPONSE_TYPE_NAME, RewritePipeline::response_from_json);

        parser
    }

    /// Register a modifier type, replacing any previous entry of that name
    pub fn register(&mut self, name: &'static str, parse: ParseFn) {
        debug!("Registering modifier type {}", name);
        self.parsers.insert(name, parse);
    }

    /// Dependencies for constructors
    pub fn context(&self) -> &ParseContext {
        &self.context
    }

    /// Parse a `{"<type name>": {...}}` document
    pub fn parse(&self, doc: &serde_json::Value) -> Result<ParseResult> {
        let object = doc.as_object().ok_or_else(|| {
            EngineError::ConfigParse("modifier document must be a JSON object".to_string())
        })?;

        if object.len() != 1 {
            return Err(EngineError::ConfigParse(format!(
                "modifier document must have exactly one type key, found {}",
                object.len()
            )));
        }

        let (name, body) = object
            .iter()
            .next()
            .ok_or_else(|| EngineError::ConfigParse("empty modifier document".to_string()))?;

        let parse = self.parsers.get(name.as_str()).ok_or_else(|| {
            EngineError::ConfigParse(format!("no modifier registered under {}", name))
        })?;

        parse(body, self)
    }
}

impl Default for ModifierParser {
    fn default() -> Self {
        Self::new(ParseContext::default())
    }
}

/// Deserialize a modifier fragment, mapping failures to `ConfigParse`
pub(crate) fn fragment<T>(name: &str, body: &serde_json::Value) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    T::deserialize(body)
        .map_err(|e| EngineError::ConfigParse(format!("invalid {} fragment: {}", name, e)))
}
