//! Record/replay proxy engine for InferenceGate
//!
//! Routes incoming OpenAI-shaped requests through the fingerprint/cache/replay
//! state machine: cache hits replay from the store (including reconstructed
//! SSE streams), misses forward upstream and record the response on the way
//! back to the client.

mod api;
mod error;
mod mode;
mod recorder;
mod replayer;
mod request;
mod router;
mod server;
mod upstream;

pub use error::GateError;
pub use mode::Mode;
pub use request::ProxyRequest;
pub use router::GateRouter;
pub use server::{GateInfo, Server};
pub use upstream::{HttpUpstream, Upstream, UpstreamBody, UpstreamError, UpstreamResponse};
