use std::{io, result::Result as StdResult};

use thiserror::Error;

/// Convenient result type for the engine crate.
pub type Result<T> = StdResult<T, Error>;

/// Unified error type for the padgrid engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Profile parsing or validation failed.
    #[error(transparent)]
    Config(#[from] config::Error),

    /// An operation required an open connection but none exists.
    #[error("not connected")]
    NotConnected,

    /// No port matched the requested or discovered identifier.
    #[error("no {direction} port matching {wanted:?}")]
    PortNotFound {
        /// "input" or "output".
        direction: &'static str,
        /// The identifier or keyword that was searched for.
        wanted: String,
    },

    /// A transport-layer failure (open, send, enumeration).
    #[error("transport error: {0}")]
    Transport(String),

    /// A port open exceeded the hard timeout.
    #[error("timed out opening {0} port")]
    OpenTimeout(&'static str),

    /// No mapping exists for the pad in the active layer.
    #[error("no mapping for note {note} in layer {layer}")]
    NoMapping {
        /// Control id of the pad.
        note: u8,
        /// The layer that was searched.
        layer: String,
    },

    /// I/O failure while performing a system operation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error with context.
    #[error("engine error: {0}")]
    Msg(String),
}
