use thiserror::Error;

/// Top-level error type for the `portier-api` crate.
///
/// Covers every failure a transport or decoder can surface to the
/// coordinators. `portier-core` maps these into its own `CoreError`.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// No reply arrived within the controller's timeout.
    ///
    /// A reply may still arrive later and be delivered through a late-reply
    /// sink, if the caller supplied one.
    #[error("controller {controller} did not reply within {timeout_ms}ms")]
    Timeout { controller: u32, timeout_ms: u64 },

    /// Socket-level failure (bind, send, receive).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Data ────────────────────────────────────────────────────────
    /// A datagram could not be decoded into a reply.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// The controller answered but refused the request.
    #[error("controller {controller} rejected request: {message}")]
    Rejected { controller: u32, message: String },

    // ── Platform ────────────────────────────────────────────────────
    /// Operation not supported by this transport or controller firmware.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// Returns `true` if retrying on a later cycle could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_))
    }

    /// Returns `true` if this is a reply timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
