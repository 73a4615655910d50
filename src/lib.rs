// src/lib.rs
//! ReplayCDN Engine Library
//!
//! Replays archived HTTP exchanges behind a proxy and holds the hot-swappable
//! request/response modifiers the proxy applies to every exchange.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **archive**: recorded exchanges and request fingerprinting
//! - **replay**: archive-backed responses, encoding renegotiation, date
//!   coherence and response transformers
//! - **modifiers**: modifier registry, configuration parsing and the rewrite
//!   pipeline
//! - **interception**: exchange types, connection hijack and the HTTP host
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration and errors

// Public module exports
pub mod archive;
pub mod interception;
pub mod modifiers;
pub mod observability;
pub mod replay;
pub mod utils;

// Re-export commonly used types
pub use archive::{Archive, ArchiveFile, Fingerprint};
pub use interception::{HttpInterceptor, InterceptorConfig, ProxyRequest, ProxyResponse};
pub use modifiers::{ModifierParser, ModifierRegistry};
pub use replay::{ReplayEngine, ReplayOutcome, ShutdownPolicy};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
