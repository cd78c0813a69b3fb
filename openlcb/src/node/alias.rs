//! Deterministic CAN alias generation and the alias mapping cache (§4.2,
//! §9 "Global-state-by-callback ... node table").
//!
//! Grounded on `openlcb_node.h`'s `OpenLcbNode_generate_seed` /
//! `_generate_alias` pair and its alias-mapping-cache accessors
//! (`_set_alias_mapping`, `_clear_alias_mapping`, `_find_alias_mapping`,
//! `_set_mapping_duplicate_alias_detected`, `_mapping_count`,
//! `_alias_mapping`), split the same way the header does: seeding and
//! mapping-cache *mutation* only ever happen from the main loop, while
//! *lookups* are also safe from the CAN driver's callback context (§1.3).

use openlcb_core::{Alias, NodeId};

/// Rotate-xor-fold seed generator (§8 S1: deterministic, frozen once chosen).
///
/// The protocol only requires that alias generation be a deterministic
/// function of the node id and the previous seed, and that a collision
/// retry produce a *different* alias. The exact constants are this engine's
/// own and are not expected to match any other OpenLCB implementation bit
/// for bit.
pub fn initial_seed(node: NodeId) -> u64 {
    node.raw() & 0x0000_FFFF_FFFF_FFFF
}

/// Advances the 48-bit seed state.
pub fn next_seed(seed: u64) -> u64 {
    let seed = seed & 0x0000_FFFF_FFFF_FFFF;
    let rotated = ((seed << 1) | ((seed >> 47) & 1)) & 0x0000_FFFF_FFFF_FFFF;
    (rotated ^ 0x0A0D_0D0D_0A0D) & 0x0000_FFFF_FFFF_FFFF
}

/// Folds a 48-bit seed down to a 12-bit alias, never returning 0 (the "no
/// alias" sentinel).
pub fn alias_from_seed(seed: u64) -> Alias {
    let folded = (seed ^ (seed >> 12) ^ (seed >> 24) ^ (seed >> 36)) & 0x0FFF;
    Alias::new(if folded == 0 { 1 } else { folded as u16 })
}

/// One step of seed-then-alias generation, as run once at login and again
/// after every detected collision.
pub fn generate(seed: u64) -> (u64, Alias) {
    let seed = next_seed(seed);
    (seed, alias_from_seed(seed))
}

/// One entry in the alias mapping cache: another node seen on the segment,
/// its alias, and whether we have since proven it a duplicate of our own.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AliasMapping {
    /// The foreign node's alias.
    pub alias: Alias,
    /// The foreign node's full node id, once learned (from an AMD frame or
    /// a Verified Node ID reply).
    pub node_id: Option<NodeId>,
    /// Set once this alias has been found colliding with a local alias.
    pub duplicate_detected: bool,
}

/// A bounded cache of other nodes' alias/node-id mappings seen on the
/// segment, used to detect a peer sending under an alias we have already
/// claimed (§4.2, "Check duplicate alias").
pub struct AliasMappingCache<const N: usize> {
    entries: heapless::Vec<AliasMapping, N>,
}

impl<const N: usize> AliasMappingCache<N> {
    /// Builds an empty cache.
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Records (or refreshes) a foreign alias/node-id mapping. Main-loop only.
    pub fn set_mapping(&mut self, alias: Alias, node_id: Option<NodeId>) {
        if let Some(existing) = self.entries.iter_mut().find(|m| m.alias == alias) {
            existing.node_id = node_id.or(existing.node_id);
            return;
        }
        if self.entries.push(AliasMapping {
            alias,
            node_id,
            duplicate_detected: false,
        }).is_err() {
            // Cache full: evict the oldest entry to make room, matching the
            // reference table's fixed-size, overwrite-oldest behavior.
            self.entries.remove(0);
            let _ = self.entries.push(AliasMapping {
                alias,
                node_id,
                duplicate_detected: false,
            });
        }
    }

    /// Drops a mapping, e.g. after observing an AMR (Alias Map Reset) for it.
    /// Main-loop only.
    pub fn clear_mapping(&mut self, alias: Alias) {
        if let Some(pos) = self.entries.iter().position(|m| m.alias == alias) {
            self.entries.remove(pos);
        }
    }

    /// Looks up a mapping by alias. Safe to call from the CAN driver's
    /// callback context as well as the main loop.
    pub fn find(&self, alias: Alias) -> Option<&AliasMapping> {
        self.entries.iter().find(|m| m.alias == alias)
    }

    /// Flags `alias` as a confirmed duplicate of one of our own. Safe from
    /// either context (it is this flag the CAN driver sets the instant it
    /// observes the collision, before the main loop has a chance to run).
    pub fn set_duplicate_detected(&mut self, alias: Alias) {
        if let Some(entry) = self.entries.iter_mut().find(|m| m.alias == alias) {
            entry.duplicate_detected = true;
        }
    }

    /// Number of mappings currently cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the cache holds no mappings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The mapping at `index`, in insertion order (oldest first).
    pub fn get(&self, index: usize) -> Option<&AliasMapping> {
        self.entries.get(index)
    }
}

impl<const N: usize> Default for AliasMappingCache<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S1: a frozen alias generation vector. If this ever changes, every
    /// downstream alias this engine has ever assigned changes with it —
    /// treat a failure here as a breaking change, not a bug fix.
    #[test]
    fn s1_alias_generation_is_frozen() {
        let seed0 = initial_seed(NodeId::new(0x0501_0101_0700));
        assert_eq!(seed0, 0x0501_0101_0700);
        let (seed1, alias1) = generate(seed0);
        assert_eq!(seed1, 0x000F_0F0F_040D);
        assert_eq!(alias1.raw(), 0x0BF2);
    }

    #[test]
    fn generate_never_returns_none_alias() {
        // Exhaustively improbable to hit zero, but the fallback exists; at
        // minimum confirm ordinary seeds don't trip it unexpectedly.
        let mut seed = initial_seed(NodeId::new(0));
        for _ in 0..64 {
            let (next, alias) = generate(seed);
            assert!(!alias.is_none());
            seed = next;
        }
    }

    #[test]
    fn collision_retry_changes_the_alias() {
        let seed0 = initial_seed(NodeId::new(0x0102_0304_0506));
        let (seed1, alias1) = generate(seed0);
        let (_, alias2) = generate(seed1);
        assert_ne!(alias1, alias2);
    }

    #[test]
    fn mapping_cache_tracks_duplicates() {
        let mut cache: AliasMappingCache<4> = AliasMappingCache::new();
        let alias = Alias::new(0x123);
        cache.set_mapping(alias, Some(NodeId::new(1)));
        assert!(!cache.find(alias).unwrap().duplicate_detected);
        cache.set_duplicate_detected(alias);
        assert!(cache.find(alias).unwrap().duplicate_detected);
        cache.clear_mapping(alias);
        assert!(cache.find(alias).is_none());
    }

    #[test]
    fn mapping_cache_evicts_oldest_when_full() {
        let mut cache: AliasMappingCache<2> = AliasMappingCache::new();
        cache.set_mapping(Alias::new(1), None);
        cache.set_mapping(Alias::new(2), None);
        cache.set_mapping(Alias::new(3), None);
        assert_eq!(cache.len(), 2);
        assert!(cache.find(Alias::new(1)).is_none());
        assert!(cache.find(Alias::new(3)).is_some());
    }
}
