//! Error types for the protocol layer.
//!
//! Each crate in dpgate defines its own error enum. A `ProtocolError`
//! always means the problem is in the bytes or in the value being
//! encoded, never in the radio link or in channel bookkeeping.

/// Errors that can occur while encoding values or parsing frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The datatype tag is not one of the six defined by the vendor.
    ///
    /// Inbound frames carrying such a tag are dropped by the router;
    /// this variant surfaces only when a caller explicitly converts a
    /// tag with `Datatype::try_from`.
    #[error("unknown datatype tag 0x{0:02x}")]
    UnknownDatatype(u8),

    /// The value cannot be encoded: wrong shape for the datatype, too
    /// wide for the wire representation, or outside declared bounds.
    ///
    /// Always raised before any transport interaction.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A wire buffer ended before the record it announced.
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
}
