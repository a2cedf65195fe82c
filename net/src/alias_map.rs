//! Bidirectional registry mapping CAN aliases to the NodeIDs that currently
//! hold them on this segment.

use std::collections::HashMap;
use std::sync::Mutex;

use openlcb_core::{net_trace, NodeId};

use crate::wire::can::CanFrame;

/// A callback invoked once per insertion, after the registry's mutex has
/// been released -- so a watcher may safely call back into the map (e.g.
/// to look up the alias it was just told about) without deadlocking.
pub type Watcher = Box<dyn Fn(u16, NodeId) + Send + Sync>;

#[derive(Default)]
struct Tables {
    alias_to_node: HashMap<u16, NodeId>,
    node_to_alias: HashMap<NodeId, u16>,
}

/// Bidirectional alias/NodeID registry.
///
/// Insert, remove and lookup are mutually exclusive behind a single mutex
/// guarding both maps; watcher dispatch happens after the guard is dropped,
/// exactly as the design notes on the observer pattern require.
#[derive(Default)]
pub struct AliasMap {
    tables: Mutex<Tables>,
    watchers: Mutex<Vec<Watcher>>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher. It observes every insertion from this point
    /// forward, exactly once, in insertion order.
    pub fn add_watcher(&self, watcher: Watcher) {
        self.watchers.lock().unwrap().push(watcher);
    }

    /// Insert or replace the mapping for `alias`/`nid`, dropping whatever
    /// stale reverse mapping either key previously held. Reinsertion of an
    /// identical `(alias, nid)` pair is idempotent and does not re-notify
    /// watchers.
    pub fn insert(&self, alias: u16, nid: NodeId) {
        {
            let mut tables = self.tables.lock().unwrap();
            if tables.alias_to_node.get(&alias) == Some(&nid) {
                return;
            }
            if let Some(stale_alias) = tables.node_to_alias.remove(&nid) {
                tables.alias_to_node.remove(&stale_alias);
            }
            if let Some(stale_node) = tables.alias_to_node.remove(&alias) {
                tables.node_to_alias.remove(&stale_node);
            }
            tables.alias_to_node.insert(alias, nid);
            tables.node_to_alias.insert(nid, alias);
        }
        for watcher in self.watchers.lock().unwrap().iter() {
            watcher(alias, nid);
        }
    }

    /// Drop the mapping for `alias`. A no-op if `alias` is unknown.
    pub fn remove(&self, alias: u16) {
        let mut tables = self.tables.lock().unwrap();
        if let Some(nid) = tables.alias_to_node.remove(&alias) {
            tables.node_to_alias.remove(&nid);
        }
    }

    /// Look up the NodeID currently holding `alias`.
    ///
    /// Returns `None` for an unknown alias -- never the all-zero sentinel,
    /// so callers can't mistake "unknown" for "present". This resolves the
    /// open question the design notes raise against sentinel reliance; see
    /// `MessageBuilder::process_frame`, the one caller allowed to fold
    /// `None` back into the sentinel for a decoded message's source.
    pub fn get_node_id(&self, alias: u16) -> Option<NodeId> {
        self.tables.lock().unwrap().alias_to_node.get(&alias).copied()
    }

    /// Look up the alias currently held by `nid`. `None` if unknown.
    pub fn get_alias(&self, nid: NodeId) -> Option<u16> {
        self.tables.lock().unwrap().node_to_alias.get(&nid).copied()
    }

    /// Apply the side effects a single inbound frame has on the registry:
    /// learn from InitializationComplete / VerifiedNodeID / Alias Map
    /// Definition, forget on Alias Map Reset, no effect otherwise.
    pub fn process_frame(&self, frame: &CanFrame) {
        if frame.is_initialization_complete() || frame.is_verified_nid() || frame.is_alias_map_definition() {
            if frame.len() >= 6 {
                self.insert(frame.source_alias(), NodeId::from_bytes(&frame.payload()[..6]));
            } else {
                net_trace!("alias map: ignoring short-payload identity frame from {:03X}", frame.source_alias());
            }
        } else if frame.is_alias_map_reset() {
            self.remove(frame.source_alias());
        }
    }
}
