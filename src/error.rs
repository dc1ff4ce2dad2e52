// ABOUTME: Top-level error types shared across the gateway's components
// ABOUTME: Component-specific errors live beside their component; this re-exports them for `main`

use thiserror::Error;

pub use crate::codec::CodecError;
pub use crate::dispatch::DispatchError;
pub use crate::fsm::FsmError;
pub use crate::record::RecordError;
pub use crate::session::SessionError;

/// Errors that can prevent the gateway from starting at all.
///
/// These are the "fail fast at startup" cases: a bad `--url`, or a TCP
/// bind failure. Everything else (framing errors, sink failures) is
/// handled locally and never reaches `main`.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GatewayError>;
