//! Error types for style loading and tile rendering.

use thiserror::Error;

/// Errors surfaced by stylesheet loading and the tile pipeline.
///
/// Stylesheet errors are all-or-nothing: a single malformed layer fails the
/// whole load, and the message names the offending layer (and operator, for
/// expression errors). Data source errors end the tile render that triggered
/// them. Cancellation is reported as [`Error::Canceled`] rather than as a
/// failure.
#[derive(Error, Debug)]
pub enum Error {
    /// The stylesheet JSON has the wrong structure.
    #[error("malformed style: {0}")]
    MalformedStyle(String),
    /// An expression could not be compiled.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
    /// A style layer has a type the renderer does not recognize.
    #[error("unsupported layer type {0:?}")]
    UnsupportedLayer(String),
    /// A recognized feature that is intentionally not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The library was built without the rasterizer.
    #[error("this build does not include the vector renderer")]
    SupportOmitted,
    /// The data source could not be reached.
    #[error("network unavailable")]
    Offline,
    /// The data source replied with an unusable response.
    #[error("bad response: {0}")]
    BadResponse(String),
    /// A tile URL template expanded to an invalid URL.
    #[error("malformed URL {0:?}")]
    MalformedUrl(String),
    /// Any other unrecoverable failure, like undecodable tile data.
    #[error("{0}")]
    Failed(String),
    /// The operation was cancelled through its [`Cancellable`].
    ///
    /// [`Cancellable`]: crate::source::Cancellable
    #[error("operation was cancelled")]
    Canceled,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
