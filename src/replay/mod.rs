// src/replay/mod.rs
//! Replay of archived HTTP exchanges
//!
//! - **engine**: per-exchange replay algorithm and control paths
//! - **encoding**: Content-Encoding negotiation and transcoding
//! - **dates**: `Date`/`Last-Modified`/`Expires` coherence
//! - **transform**: response transformer trait
//! - **script_injector**: HTML script injection transformer

pub mod dates;
pub mod encoding;
pub mod engine;
pub mod script_injector;
pub mod transform;

pub use encoding::{renegotiate, AcceptEncoding, ContentEncoding};
pub use engine::{
    ReplayEngine, ReplayOutcome, ShutdownPolicy, COMMAND_EXIT_PATH, GENERATE_200_PATH,
    RESET_CHRONOLOGY_PATH, TIME_SEED_PLACEHOLDER,
};
pub use script_injector::ScriptInjector;
pub use transform::ResponseTransformer;
