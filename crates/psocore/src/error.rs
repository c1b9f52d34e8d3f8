// error.rs -- Error taxonomy shared by every service-facing crate.
//
// Mirrors the error kinds named in the design: transport, framing and
// crypto errors drop the connection; auth and database errors get a
// reply first; version-gated features resolve to `Ok(())` rather than
// an error at all, so there is no variant for them here.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("transport closed")]
    TransportClosed,

    #[error("transport would block")]
    TransportBlocked,

    #[error("framing error: {0}")]
    Framing(&'static str),

    #[error("crypto error: {0}")]
    Crypto(&'static str),

    #[error("authentication failed")]
    AuthFailure,

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("resource exhausted: {0}")]
    ResourceExhaustion(&'static str),

    #[error("handler logic error: {0}")]
    HandlerLogic(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtoError {
    /// Whether this error means "drop the client", per the propagation
    /// policy: transport, framing and crypto errors are always fatal;
    /// the rest are handled by the caller on a case-by-case basis.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtoError::TransportClosed
                | ProtoError::Framing(_)
                | ProtoError::Crypto(_)
                | ProtoError::ResourceExhaustion(_)
                | ProtoError::HandlerLogic(_)
                | ProtoError::Config(_)
                | ProtoError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtoError>;
