//! DP ownership: which logical channel answers for which DP.
//!
//! The registry replaces per-channel listeners on the shared node
//! endpoint. Each `(node, dp)` pair has at most one owner, so an inbound
//! frame reaches exactly one channel or none.
//!
//! The registry is generic over the handle `C` it stores next to each
//! channel id; the adapter stores `Arc<LogicalChannel>`, tests can store
//! `()`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use dpgate_channel::LogicalChannel;
use dpgate_protocol::{ChannelId, DpId, NodeId};

use crate::RegistryError;

/// The registry as shared between the adapter, the router, and node sync.
pub type SharedRegistry<T, P> = Arc<RwLock<ChannelRegistry<Arc<LogicalChannel<T, P>>>>>;

struct Entry<C> {
    owned: Vec<DpId>,
    handle: C,
}

/// Maps `(node, dp)` to the owning channel.
pub struct ChannelRegistry<C> {
    /// Ownership index, one entry per owned DP.
    owners: HashMap<(NodeId, DpId), ChannelId>,

    /// Registered channels with their owned DPs. Kept in sync with `owners`.
    channels: HashMap<ChannelId, Entry<C>>,
}

impl<C> Default for ChannelRegistry<C> {
    fn default() -> Self {
        Self {
            owners: HashMap::new(),
            channels: HashMap::new(),
        }
    }
}

impl<C> ChannelRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `channel` on `node` as the owner of `owned`.
    ///
    /// Duplicate DPs in `owned` are collapsed.
    ///
    /// # Errors
    /// - [`RegistryError::NodeMismatch`] if `channel` names another node.
    /// - [`RegistryError::ChannelExists`] if `channel` is registered.
    /// - [`RegistryError::DpConflict`] if another channel owns one of the
    ///   DPs. Nothing is registered in that case.
    pub fn register(
        &mut self,
        node: NodeId,
        channel: ChannelId,
        owned: impl IntoIterator<Item = DpId>,
        handle: C,
    ) -> Result<(), RegistryError> {
        if channel.node != node {
            return Err(RegistryError::NodeMismatch { channel, node });
        }
        if self.channels.contains_key(&channel) {
            return Err(RegistryError::ChannelExists(channel));
        }

        let owned: Vec<DpId> = owned.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        if let Some((dp, owner)) = owned
            .iter()
            .find_map(|dp| self.owners.get(&(node, *dp)).map(|owner| (*dp, *owner)))
        {
            return Err(RegistryError::DpConflict { node, dp, owner });
        }

        for dp in &owned {
            self.owners.insert((node, *dp), channel);
        }
        tracing::debug!(%channel, dps = ?owned, "channel registered");
        self.channels.insert(channel, Entry { owned, handle });
        Ok(())
    }

    /// The channel owning `dp` on `node`. Never fails; unowned is `None`.
    pub fn resolve(&self, node: NodeId, dp: DpId) -> Option<ChannelId> {
        self.owners.get(&(node, dp)).copied()
    }

    /// Like [`resolve`](Self::resolve), returning the stored handle too.
    pub fn lookup(&self, node: NodeId, dp: DpId) -> Option<(ChannelId, &C)> {
        let channel = self.resolve(node, dp)?;
        self.channels.get(&channel).map(|e| (channel, &e.handle))
    }

    /// The handle stored for `channel`.
    pub fn get(&self, channel: ChannelId) -> Option<&C> {
        self.channels.get(&channel).map(|e| &e.handle)
    }

    /// Removes `channel` and releases its DPs. Returns the handle, or
    /// `None` if the channel was not registered.
    pub fn unregister(&mut self, channel: ChannelId) -> Option<C> {
        let entry = self.channels.remove(&channel)?;
        for dp in &entry.owned {
            self.owners.remove(&(channel.node, *dp));
        }
        tracing::debug!(%channel, "channel unregistered");
        Some(entry.handle)
    }

    /// The DPs owned by `channel`, ascending.
    pub fn dps_of(&self, channel: ChannelId) -> Option<&[DpId]> {
        self.channels.get(&channel).map(|e| e.owned.as_slice())
    }

    /// Registered channels on `node`, by gang.
    pub fn channels_of(&self, node: NodeId) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self
            .channels
            .keys()
            .filter(|c| c.node == node)
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Every DP owned by any channel on `node`, ascending.
    pub fn owned_dps(&self, node: NodeId) -> Vec<DpId> {
        let mut dps: Vec<DpId> = self
            .owners
            .keys()
            .filter(|(n, _)| *n == node)
            .map(|(_, dp)| *dp)
            .collect();
        dps.sort();
        dps
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn nid(id: u64) -> NodeId {
        NodeId(id)
    }

    fn ch(node: u64, gang: u8) -> ChannelId {
        ChannelId::new(nid(node), gang)
    }

    fn dps(ids: &[u8]) -> Vec<DpId> {
        ids.iter().map(|&d| DpId(d)).collect()
    }

    /// A 4-gang node: gang 1 also owns the shared power-on DP 14.
    fn four_gang() -> ChannelRegistry<()> {
        let mut reg = ChannelRegistry::new();
        reg.register(nid(1), ch(1, 1), dps(&[1, 14]), ()).unwrap();
        for gang in 2..=4 {
            reg.register(nid(1), ch(1, gang), dps(&[gang]), ()).unwrap();
        }
        reg
    }

    // =====================================================================
    // register()
    // =====================================================================

    #[test]
    fn test_register_conflicting_dp_is_rejected_atomically() {
        let mut reg = four_gang();

        let err = reg
            .register(nid(1), ch(1, 5), dps(&[5, 3]), ())
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::DpConflict {
                node: nid(1),
                dp: DpId(3),
                owner: ch(1, 3),
            }
        );
        // DP 5 was not claimed either.
        assert_eq!(reg.resolve(nid(1), DpId(5)), None);
        assert!(reg.get(ch(1, 5)).is_none());
    }

    #[test]
    fn test_register_same_dp_on_other_node_is_fine() {
        let mut reg = four_gang();
        reg.register(nid(2), ch(2, 1), dps(&[1]), ()).unwrap();
        assert_eq!(reg.resolve(nid(2), DpId(1)), Some(ch(2, 1)));
        assert_eq!(reg.resolve(nid(1), DpId(1)), Some(ch(1, 1)));
    }

    #[test]
    fn test_register_foreign_channel_id_is_rejected() {
        let mut reg = ChannelRegistry::new();
        let err = reg.register(nid(1), ch(2, 1), dps(&[1]), ()).unwrap_err();
        assert_eq!(
            err,
            RegistryError::NodeMismatch {
                channel: ch(2, 1),
                node: nid(1)
            }
        );
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let mut reg = four_gang();
        let err = reg.register(nid(1), ch(1, 2), dps(&[9]), ()).unwrap_err();
        assert_eq!(err, RegistryError::ChannelExists(ch(1, 2)));
    }

    #[test]
    fn test_register_duplicate_dps_collapse() {
        let mut reg = ChannelRegistry::new();
        reg.register(nid(1), ch(1, 1), dps(&[2, 1, 2]), ()).unwrap();
        assert_eq!(reg.dps_of(ch(1, 1)), Some(dps(&[1, 2]).as_slice()));
    }

    // =====================================================================
    // resolve() / unregister()
    // =====================================================================

    #[test]
    fn test_resolve_shared_dp_goes_to_main_channel_only() {
        let reg = four_gang();
        assert_eq!(reg.resolve(nid(1), DpId(14)), Some(ch(1, 1)));
        assert_eq!(reg.dps_of(ch(1, 2)), Some(dps(&[2]).as_slice()));
    }

    #[test]
    fn test_resolve_unowned_dp_is_none() {
        let reg = four_gang();
        assert_eq!(reg.resolve(nid(1), DpId(99)), None);
        assert_eq!(reg.resolve(nid(7), DpId(1)), None);
    }

    #[test]
    fn test_unregister_releases_dps_for_reuse() {
        let mut reg = four_gang();
        assert_eq!(reg.unregister(ch(1, 3)), Some(()));
        assert_eq!(reg.resolve(nid(1), DpId(3)), None);

        reg.register(nid(1), ch(1, 3), dps(&[3]), ()).unwrap();
        assert_eq!(reg.resolve(nid(1), DpId(3)), Some(ch(1, 3)));
    }

    #[test]
    fn test_unregister_unknown_channel_is_none() {
        let mut reg = four_gang();
        assert_eq!(reg.unregister(ch(9, 1)), None);
        assert_eq!(reg.len(), 4);
    }

    // =====================================================================
    // channels_of() / owned_dps()
    // =====================================================================

    #[test]
    fn test_owned_dps_is_union_over_channels() {
        let reg = four_gang();
        assert_eq!(reg.owned_dps(nid(1)), dps(&[1, 2, 3, 4, 14]));
        assert_eq!(
            reg.channels_of(nid(1)),
            vec![ch(1, 1), ch(1, 2), ch(1, 3), ch(1, 4)]
        );
        assert!(reg.owned_dps(nid(2)).is_empty());
    }
}
