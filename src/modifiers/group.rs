// src/modifiers/group.rs
//! Ordered group of modifiers
//!
//! Children run in declaration order and the first error stops the group.
//! Verification aggregates every child that can verify.

use crate::interception::{ProxyRequest, ProxyResponse};
use crate::modifiers::parse::{fragment, ModifierParser, ModifierScope, ParseResult};
use crate::modifiers::{
    RequestModifier, RequestVerifier, ResponseModifier, ResponseVerifier,
};
use crate::utils::errors::{EngineError, Result};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ModifierGroupJson {
    #[serde(default)]
    modifiers: Vec<serde_json::Value>,

    #[serde(default)]
    scope: Vec<ModifierScope>,
}

/// Modifiers applied one after another
#[derive(Default)]
pub struct ModifierGroup {
    request: Vec<Arc<dyn RequestModifier>>,
    response: Vec<Arc<dyn ResponseModifier>>,
}

impl ModifierGroup {
    /// Registered type name
    pub const TYPE_NAME: &'static str = "fifo.Group";

    /// Create an empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request modifier
    pub fn add_request_modifier(&mut self, modifier: Arc<dyn RequestModifier>) {
        self.request.push(modifier);
    }

    /// Append a response modifier
    pub fn add_response_modifier(&mut self, modifier: Arc<dyn ResponseModifier>) {
        self.response.push(modifier);
    }

    /// Build a group from its JSON fragment, parsing each child document
    pub fn from_json(body: &serde_json::Value, parser: &ModifierParser) -> Result<ParseResult> {
        let msg: ModifierGroupJson = fragment(Self::TYPE_NAME, body)?;

        let mut group = Self::new();
        for child in &msg.modifiers {
            let (request, response) = parser.parse(child)?.into_parts();
            if let Some(request) = request {
                group.add_request_modifier(request);
            }
            if let Some(response) = response {
                group.add_response_modifier(response);
            }
        }

        Ok(ParseResult::scoped(Arc::new(group), &msg.scope))
    }
}

impl RequestModifier for ModifierGroup {
    fn modify_request(&self, req: &mut ProxyRequest) -> Result<()> {
        for modifier in &self.request {
            modifier.modify_request(req)?;
        }
        Ok(())
    }

    fn request_verifier(&self) -> Option<&dyn RequestVerifier> {
        Some(self)
    }
}

impl ResponseModifier for ModifierGroup {
    fn modify_response(&self, resp: &mut ProxyResponse) -> Result<()> {
        for modifier in &self.response {
            modifier.modify_response(resp)?;
        }
        Ok(())
    }

    fn response_verifier(&self) -> Option<&dyn ResponseVerifier> {
        Some(self)
    }
}

impl RequestVerifier for ModifierGroup {
    fn verify_requests(&self) -> Result<()> {
        let failures: Vec<String> = self
            .request
            .iter()
            .filter_map(|m| m.request_verifier())
            .filter_map(|v| v.verify_requests().err())
            .map(|e| e.to_string())
            .collect();

        merge_failures(failures)
    }

    fn reset_request_verifications(&self) {
        for verifier in self.request.iter().filter_map(|m| m.request_verifier()) {
            verifier.reset_request_verifications();
        }
    }
}

impl ResponseVerifier for ModifierGroup {
    fn verify_responses(&self) -> Result<()> {
        let failures: Vec<String> = self
            .response
            .iter()
            .filter_map(|m| m.response_verifier())
            .filter_map(|v| v.verify_responses().err())
            .map(|e| e.to_string())
            .collect();

        merge_failures(failures)
    }

    fn reset_response_verifications(&self) {
        for verifier in self.response.iter().filter_map(|m| m.response_verifier()) {
            verifier.reset_response_verifications();
        }
    }
}

fn merge_failures(failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Verification(failures.join("; ")))
    }
}
