// src/interception/mod.rs
//! Exchange plumbing between clients, modifiers and the replay engine
//!
//! - **exchange**: request/response types and their extensions
//! - **session**: connection hijack capability used by short-circuiting modifiers
//! - **http_interceptor**: HTTP/1 host driving modifiers and replay
//!
//! # Architecture
//!
//! ```text
//! Client
//!     │
//!     └─ HTTP Request → HttpInterceptor
//!                         ├─ ModifierRegistry.modify_request ──(hijack)──→ Client
//!                         ├─ ReplayEngine.round_trip
//!                         └─ ModifierRegistry.modify_response → Client
//! ```

pub mod exchange;
pub mod http_interceptor;
pub mod session;

// Re-export commonly used types
pub use exchange::{
    attach_origin, clone_response, placeholder_response, request_host, response_origin_host,
    ClientAddr, OriginRequest, ProxyRequest, ProxyResponse,
};
pub use http_interceptor::{HttpInterceptor, InterceptorConfig, Served};
pub use session::{CapturedSession, HijackedConn, Session, SessionHandle};
