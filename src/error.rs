use thiserror::Error;

use crate::config::ConfigError;
use crate::core::CoreError;
use crate::engine::error::ProtocolError;
use crate::transport::TransportError;

/// Crate-level convenience error.
///
/// Not a "god error": a thin wrapper over the per-capability errors.
/// Transport and protocol failures normally stay inside the engine
/// (logged, counted, reflected in liveness); this type exists for
/// embedding code that drives the transport or constructor directly.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
