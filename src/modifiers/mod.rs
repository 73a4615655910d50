// src/modifiers/mod.rs
//! Request/response modifiers
//!
//! This module holds the pluggable mutators the proxy runs on every exchange:
//!
//! - **Registry**: lock-guarded, hot-swappable current modifier pair
//! - **Parse**: JSON documents to modifiers, keyed by registered type name
//! - **Group**: ordered composition of modifiers
//! - **Rewrite**: bypass rules, rewriting and short-circuit hijack
//! - **Rewriter**: the rewriting capability consumed by the pipeline
//!
//! # Architecture
//!
//! ```text
//! JSON document ─→ ModifierParser ─→ ParseResult ─→ ModifierRegistry
//!                                                       │ (RwLock)
//! exchange ─→ modify_request ─→ [replay] ─→ modify_response ─→ client
//! ```

pub mod group;
pub mod parse;
pub mod registry;
pub mod rewrite;
pub mod rewriter;

use crate::interception::{ProxyRequest, ProxyResponse};
use crate::utils::errors::Result;

/// Mutates requests before they are served
pub trait RequestModifier: Send + Sync {
    /// Modify the request in place
    fn modify_request(&self, req: &mut ProxyRequest) -> Result<()>;

    /// Verification capability, if this modifier records expectations
    fn request_verifier(&self) -> Option<&dyn RequestVerifier> {
        None
    }
}

/// Mutates responses before they reach the client
pub trait ResponseModifier: Send + Sync {
    /// Modify the response in place
    fn modify_response(&self, resp: &mut ProxyResponse) -> Result<()>;

    /// Verification capability, if this modifier records expectations
    fn response_verifier(&self) -> Option<&dyn ResponseVerifier> {
        None
    }
}

/// Optional capability of request modifiers that check what they saw
pub trait RequestVerifier: Send + Sync {
    /// Report failed expectations
    fn verify_requests(&self) -> Result<()>;

    /// Forget everything recorded so far
    fn reset_request_verifications(&self);
}

/// Optional capability of response modifiers that check what they saw
pub trait ResponseVerifier: Send + Sync {
    /// Report failed expectations
    fn verify_responses(&self) -> Result<()>;

    /// Forget everything recorded so far
    fn reset_response_verifications(&self);
}

/// Modifier that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

impl RequestModifier for Noop {
    fn modify_request(&self, _req: &mut ProxyRequest) -> Result<()> {
        Ok(())
    }
}

impl ResponseModifier for Noop {
    fn modify_response(&self, _resp: &mut ProxyResponse) -> Result<()> {
        Ok(())
    }
}

pub use group::ModifierGroup;
pub use parse::{ModifierParser, ModifierScope, ParseContext, ParseResult};
pub use registry::{ModifierConfig, ModifierRegistry};
pub use rewrite::{BypassRule, RewritePipeline};
pub use rewriter::{BaseDomainRewriter, Rewriter};
