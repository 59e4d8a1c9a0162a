//! Node-level plumbing for dpgate.
//!
//! Several logical channels share one physical node and one radio link.
//! This crate keeps them apart and keeps them in sync:
//!
//! - [`ChannelRegistry`]: which channel owns which DP on which node.
//! - [`InboundRouter`]: decodes inbound frames and hands each one to its
//!   owning channel, and to nobody else.
//! - [`NodeSync`]: the rejoin state machine: debounces `online` /
//!   `announce` events and re-queries every owned DP so cached state
//!   catches up with the device.
//!
//! # Key types
//!
//! - [`RejoinConfig`]: rejoin and initial-query timing
//! - [`RejoinState`]: per-node rejoin bookkeeping
//! - [`RouteOutcome`]: what happened to an inbound frame

mod error;
mod registry;
mod rejoin;
mod router;

pub use error::RegistryError;
pub use registry::{ChannelRegistry, SharedRegistry};
pub use rejoin::{
    NodeSync, QueryReport, REJOIN_DEBOUNCE, RejoinConfig, RejoinDecision, RejoinState, SyncPhase,
};
pub use router::{InboundRouter, RouteOutcome};
