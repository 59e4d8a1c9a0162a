//! Data-point protocol for dpgate.
//!
//! This crate defines the "language" spoken between the adapter and a
//! multi-gang device over the mesh cluster transport:
//!
//! - **Types** ([`DataPointFrame`], [`DecodedValue`], [`Datatype`], the
//!   identity newtypes): the units that travel on the wire.
//! - **Codec** ([`decode`], [`encode`], [`encode_bounded`]): how a frame
//!   payload turns into a typed value and back.
//! - **Wire** ([`DpCommand`]): the byte layout of a cluster command that
//!   carries one or more DP records.
//! - **Errors** ([`ProtocolError`]): what can go wrong while encoding or
//!   parsing.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about channels, retries, or nodes
//! coming and going. It only knows how DP payloads are laid out.
//!
//! ```text
//! Transport (frames) → Protocol (DecodedValue) → Channel (capability state)
//! ```

mod codec;
mod error;
mod types;
mod wire;

pub use codec::{ValueBounds, decode, encode, encode_bounded};
pub use error::ProtocolError;
pub use types::{ChannelId, DataPointFrame, Datatype, DecodedValue, DpId, NodeId};
pub use wire::{DpCommand, RECORD_HEADER_LEN};
