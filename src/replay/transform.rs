// src/replay/transform.rs
//! Response transformers applied after a successful archive lookup

use crate::interception::{ProxyRequest, ProxyResponse};

/// Mutates a replayed response in place before it is forwarded
///
/// Transformers run in registration order and have no error channel.
/// Implementations that can fail log the failure and leave the response as
/// it was.
pub trait ResponseTransformer: Send + Sync {
    fn transform(&self, req: &ProxyRequest, resp: &mut ProxyResponse);
}
