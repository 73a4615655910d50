// src/modifiers/registry.rs
//! Hot-swappable modifier store
//!
//! Holds the current `ModifierConfig` behind a reader/writer lock. Every
//! exchange takes the read lock for exactly one delegated call; swaps and
//! verification resets take the write lock. The lock is never held across
//! an exchange, so a reconfiguration only waits for in-flight modifier calls.

use crate::modifiers::parse::ModifierParser;
use crate::modifiers::{Noop, RequestModifier, ResponseModifier};
use crate::interception::{ProxyRequest, ProxyResponse};
use crate::observability::MODIFIER_SWAPS_TOTAL;
use crate::utils::errors::{EngineError, Result};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Snapshot of the active modifier pair and the document it came from
pub struct ModifierConfig {
    /// Pretty-printed JSON document, empty when set programmatically
    raw: Vec<u8>,

    /// Active request modifier
    request: Arc<dyn RequestModifier>,

    /// Active response modifier
    response: Arc<dyn ResponseModifier>,
}

impl ModifierConfig {
    fn new(
        raw: Vec<u8>,
        request: Option<Arc<dyn RequestModifier>>,
        response: Option<Arc<dyn ResponseModifier>>,
    ) -> Self {
        Self {
            raw,
            request: request.unwrap_or_else(|| Arc::new(Noop)),
            response: response.unwrap_or_else(|| Arc::new(Noop)),
        }
    }
}

impl Default for ModifierConfig {
    fn default() -> Self {
        Self::new(Vec::new(), None, None)
    }
}

/// Concurrency-safe holder of the current modifier pair
pub struct ModifierRegistry {
    current: RwLock<ModifierConfig>,
    parser: ModifierParser,
}

impl ModifierRegistry {
    /// Create a registry with no-op modifiers
    pub fn new(parser: ModifierParser) -> Self {
        Self {
            current: RwLock::new(ModifierConfig::default()),
            parser,
        }
    }

    /// Create a registry from a JSON modifier document on disk
    pub fn initialize(path: impl AsRef<Path>, parser: ModifierParser) -> Result<Self> {
        let path = path.as_ref();
        let body = std::fs::read(path).map_err(|e| {
            EngineError::ConfigParse(format!("failed to read {}: {}", path.display(), e))
        })?;

        let registry = Self::new(parser);
        registry.apply_config(&body)?;

        info!("Loaded modifier configuration from {}", path.display());
        Ok(registry)
    }

    /// Replace the whole snapshot from a JSON document. The document is
    /// parsed before the lock is taken; on error the current snapshot stays.
    pub fn apply_config(&self, body: &[u8]) -> Result<()> {
        let doc: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| EngineError::ConfigParse(format!("error parsing JSON: {}", e)))?;

        let result = self.parser.parse(&doc)?;

        let raw = serde_json::to_vec_pretty(&doc)
            .map_err(|e| EngineError::ConfigParse(format!("error formatting JSON: {}", e)))?;

        let (request, response) = result.into_parts();
        let next = ModifierConfig::new(raw, request, response);

        *self.current.write() = next;
        metrics::counter!(MODIFIER_SWAPS_TOTAL).increment(1);

        debug!("Installed new modifier configuration");
        Ok(())
    }

    /// The retained configuration document
    pub fn config_bytes(&self) -> Vec<u8> {
        self.current.read().raw.clone()
    }

    /// Replace the request modifier; `None` installs a no-op
    pub fn set_request_modifier(&self, modifier: Option<Arc<dyn RequestModifier>>) {
        let modifier = modifier.unwrap_or_else(|| Arc::new(Noop));
        self.current.write().request = modifier;
        metrics::counter!(MODIFIER_SWAPS_TOTAL).increment(1);
    }

    /// Replace the response modifier; `None` installs a no-op
    pub fn set_response_modifier(&self, modifier: Option<Arc<dyn ResponseModifier>>) {
        let modifier = modifier.unwrap_or_else(|| Arc::new(Noop));
        self.current.write().response = modifier;
        metrics::counter!(MODIFIER_SWAPS_TOTAL).increment(1);
    }

    /// Run the current request modifier
    pub fn modify_request(&self, req: &mut ProxyRequest) -> Result<()> {
        let current = self.current.read();
        current.request.modify_request(req)
    }

    /// Run the current response modifier
    pub fn modify_response(&self, resp: &mut ProxyResponse) -> Result<()> {
        let current = self.current.read();
        current.response.modify_response(resp)
    }

    /// Verify the request modifier, if it can verify
    pub fn verify_requests(&self) -> Result<()> {
        let current = self.current.read();
        match current.request.request_verifier() {
            Some(verifier) => verifier.verify_requests(),
            None => Ok(()),
        }
    }

    /// Verify the response modifier, if it can verify
    pub fn verify_responses(&self) -> Result<()> {
        let current = self.current.read();
        match current.response.response_verifier() {
            Some(verifier) => verifier.verify_responses(),
            None => Ok(()),
        }
    }

    /// Reset request verifications, if the request modifier can verify
    pub fn reset_request_verifications(&self) {
        let current = self.current.write();
        if let Some(verifier) = current.request.request_verifier() {
            verifier.reset_request_verifications();
        }
    }

    /// Reset response verifications, if the response modifier can verify
    pub fn reset_response_verifications(&self) {
        let current = self.current.write();
        if let Some(verifier) = current.response.response_verifier() {
            verifier.reset_response_verifications();
        }
    }
}

impl Default for ModifierRegistry {
    fn default() -> Self {
        Self::new(ModifierParser::default())
    }
}
