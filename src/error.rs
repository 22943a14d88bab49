use std::io;
use std::net::SocketAddr;

use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("resource exhausted: {0}")]
    ResourceExhausted(#[source] io::Error),

    #[error("registration failed: {0}")]
    RegistrationFailed(#[source] io::Error),

    #[error("failed to bind listener on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    /// The connection carries no redirect metadata (or no rule matched).
    #[error("cannot resolve original destination of {peer}: {reason}")]
    Resolution { peer: String, reason: String },

    #[error("connect to {addr} failed: {source}")]
    Establish { addr: SocketAddr, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn resolution<P, R>(peer: P, reason: R) -> Error
        where P: ToString, R: ToString
    {
        Error::Resolution{ peer: peer.to_string(), reason: reason.to_string() }
    }
}
