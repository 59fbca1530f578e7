//! C3 — forest: the unique table, op cache, garbage collector and
//! reference-counted edges built on top of [`crate::holes`] and
//! [`crate::storage`].

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::error::{DdError, DdResult};
use crate::handle::{Handle, Level, NodeId, RangeType, RawHandle, Terminal};
use crate::holes::HoleManager;
use crate::storage::{hash_node, Downs, NodeStorage, UnpackedNode};

/// When a node's down-pointers all collapse to one child, `create_reduced_node`
/// decides whether to eliminate the node (return the child directly) or keep
/// it explicit.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Reduction {
    /// Eliminate any node whose children are all equal.
    Fully,
    /// Same elimination as `Fully` for the node shapes this engine builds;
    /// kept as a distinct policy so forests can be tagged by the reduction
    /// rule their algorithm family expects (quasi-reduced MDDs still forbid
    /// skipped levels elsewhere in the API, e.g. `unpack` always returning a
    /// full-domain `Downs::Full`).
    Quasi,
    /// Never eliminate: every level between a node and its children is kept
    /// explicit, used by relation forests to represent "no change" edges.
    Identity,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum GcPolicy {
    /// Recycle a node the instant its reference count hits zero.
    Optimistic,
    /// Keep a zero-reference-count node alive as a zombie until the op
    /// cache also drops its last reference, so a cache hit can still return
    /// it without rebuilding.
    Pessimistic,
}

#[derive(Default, Clone, Copy, Debug)]
pub struct Stats {
    pub active_nodes: usize,
    pub peak_nodes: usize,
    pub created_nodes: u64,
    pub reclaimed_nodes: u64,
    pub unique_table_hits: u64,
    pub unique_table_misses: u64,
    pub compactions: u64,
    pub gc_sweeps: u64,
}

/// A cache key for the operation cache: the operator tag plus its operand
/// handles. Forests above this layer (image, apply, ite, ...) define their
/// own small enums for `op` and feed them through here.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct OpKey {
    pub op: u32,
    pub operands: SmallVec<[RawHandle; 3]>,
}

impl OpKey {
    pub fn new(op: u32, operands: &[Handle]) -> Self {
        OpKey { op, operands: operands.iter().map(|h| h.to_raw()).collect() }
    }
}

struct Slot {
    addr: usize,
    in_count: i32,
    cache_count: u32,
    zombie: bool,
    /// Set once this slot's node has actually been recycled. A freed slot's
    /// index is eligible for reuse by a later, unrelated node, so any op
    /// cache entry still naming it is stale and must be treated as a miss.
    freed: bool,
}

pub struct Forest {
    pub range: RangeType,
    pub reduction: Reduction,
    pub gc_policy: GcPolicy,
    data: Vec<i64>,
    holes: Box<dyn HoleManager>,
    storage: Box<dyn NodeStorage>,
    slots: Vec<Slot>,
    free_ids: Vec<u32>,
    unique: HashMap<u64, SmallVec<[NodeId; 4]>>,
    op_cache: HashMap<OpKey, Handle>,
    var_order_locked: bool,
    pub stats: Stats,
}

pub type ForestHandle = Rc<RefCell<Forest>>;

impl Forest {
    pub fn new(
        range: RangeType,
        reduction: Reduction,
        gc_policy: GcPolicy,
        holes: Box<dyn HoleManager>,
        storage: Box<dyn NodeStorage>,
    ) -> ForestHandle {
        Rc::new(RefCell::new(Forest {
            range,
            reduction,
            gc_policy,
            data: Vec::new(),
            holes,
            storage,
            slots: Vec::new(),
            free_ids: Vec::new(),
            unique: HashMap::new(),
            op_cache: HashMap::new(),
            var_order_locked: false,
            stats: Stats::default(),
        }))
    }

    fn addr(&self, id: NodeId) -> usize {
        self.slots[usize::from(id)].addr
    }

    fn alloc_slot(&mut self, addr: usize) -> NodeId {
        if let Some(idx) = self.free_ids.pop() {
            self.slots[idx as usize] = Slot { addr, in_count: 0, cache_count: 0, zombie: false, freed: false };
            NodeId::from_index(idx)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Slot { addr, in_count: 0, cache_count: 0, zombie: false, freed: false });
            NodeId::from_index(idx)
        }
    }

    fn redundancy_target(&self, downs: &Downs) -> Option<RawHandle> {
        if self.reduction == Reduction::Identity {
            return None;
        }
        let mut iter = downs.iter_entries();
        let (_, first) = iter.next()?;
        if downs.len() < self.full_domain_hint() {
            // a sparse node that omits entries cannot be fully redundant:
            // the missing entries implicitly point at the default value.
            return None;
        }
        if iter.all(|(_, h)| h == first) {
            Some(first)
        } else {
            None
        }
    }

    /// Best-effort arity hint for redundancy checks on sparse nodes: without
    /// tracking per-level domain sizes here (that lives in `symvars`), a
    /// sparse node is only ever treated as redundant when it is dense enough
    /// to enumerate at least two entries.
    fn full_domain_hint(&self) -> usize {
        2
    }

    /// Looks up or creates the canonical node for `(level, downs)`,
    /// returning an unlinked handle (the caller is responsible for a
    /// matching [`Forest::link`] once the handle is stored somewhere
    /// durable, e.g. as another node's child or a [`DdEdge`]).
    pub fn create_reduced_node(&mut self, level: Level, downs: Downs) -> DdResult<Handle> {
        if downs.is_empty() {
            return Err(DdError::InvalidArgument("node with no children".into()));
        }
        if let Some(target) = self.redundancy_target(&downs) {
            return Ok(Handle::from_raw(target, self.range));
        }

        let node = UnpackedNode::new(level, downs);
        let h = hash_node(&node);
        if let Some(bucket) = self.unique.get(&h) {
            for &id in bucket {
                let addr = self.addr(id);
                let candidate = self.storage.unpack(&self.data, addr)?;
                if candidate.level == node.level && candidate.downs == node.downs {
                    self.stats.unique_table_hits += 1;
                    self.revive_if_zombie(id);
                    return Ok(Handle::Node(id));
                }
            }
        }
        self.stats.unique_table_misses += 1;
        self.var_order_locked = true;

        let size = self.storage.node_size(&node);
        let addr = self.holes.request_chunk(&mut self.data, size)?;
        self.storage.pack(&mut self.data, addr, &node)?;
        let id = self.alloc_slot(addr);
        self.unique.entry(h).or_default().push(id);

        for (_, down) in node.downs.iter_entries() {
            self.link(Handle::from_raw(down, self.range));
        }

        self.stats.created_nodes += 1;
        self.stats.active_nodes += 1;
        self.stats.peak_nodes = self.stats.peak_nodes.max(self.stats.active_nodes);
        Ok(Handle::Node(id))
    }

    fn revive_if_zombie(&mut self, id: NodeId) {
        let slot = &mut self.slots[usize::from(id)];
        if slot.zombie {
            slot.zombie = false;
            self.stats.active_nodes += 1;
        }
    }

    /// Records a new reference to `h`. No-op for terminals.
    pub fn link(&mut self, h: Handle) {
        if let Some(id) = h.as_node() {
            self.slots[usize::from(id)].in_count += 1;
        }
    }

    /// Drops a reference to `h`, recycling the node (and cascading into its
    /// children) once it is unreachable under the active [`GcPolicy`].
    pub fn unlink(&mut self, h: Handle) {
        let Some(id) = h.as_node() else { return };
        {
            let slot = &mut self.slots[usize::from(id)];
            debug_assert!(slot.in_count > 0, "unlink underflow on a live node");
            slot.in_count -= 1;
        }
        self.maybe_reclaim(id);
    }

    fn maybe_reclaim(&mut self, id: NodeId) {
        let slot = &self.slots[usize::from(id)];
        if slot.in_count > 0 {
            return;
        }
        match self.gc_policy {
            GcPolicy::Optimistic => self.delete_node(id),
            GcPolicy::Pessimistic => {
                if slot.cache_count == 0 {
                    self.delete_node(id);
                } else if !slot.zombie {
                    self.slots[usize::from(id)].zombie = true;
                    self.stats.active_nodes -= 1;
                }
            }
        }
    }

    fn delete_node(&mut self, id: NodeId) {
        let addr = self.addr(id);
        let node = match self.storage.unpack(&self.data, addr) {
            Ok(n) => n,
            Err(_) => return,
        };
        let h = hash_node(&node);
        if let Some(bucket) = self.unique.get_mut(&h) {
            bucket.retain(|other| *other != id);
            if bucket.is_empty() {
                self.unique.remove(&h);
            }
        }
        self.holes.recycle_chunk(&mut self.data, addr, self.storage.node_size(&node));
        let was_zombie = self.slots[usize::from(id)].zombie;
        self.slots[usize::from(id)].freed = true;
        self.free_ids.push(id.index());
        if !was_zombie {
            self.stats.active_nodes -= 1;
        }
        self.stats.reclaimed_nodes += 1;

        for (_, down) in node.downs.iter_entries() {
            self.unlink(Handle::from_raw(down, self.range));
        }
    }

    fn is_live(&self, h: Handle) -> bool {
        match h.as_node() {
            Some(id) => !self.slots[usize::from(id)].freed,
            None => true,
        }
    }

    /// Looks up a cached result, discarding (and forgetting) it if either an
    /// operand or the stored result names a node that has since been
    /// recycled. Without this check, an optimistically-collected node's id
    /// could be reused for unrelated content and a stale cache hit would
    /// silently return the wrong node.
    pub fn cache_lookup(&mut self, key: &OpKey) -> Option<Handle> {
        let result = *self.op_cache.get(key)?;
        let operands_live = key.operands.iter().all(|&raw| self.is_live(Handle::from_raw(raw, self.range)));
        if operands_live && self.is_live(result) {
            Some(result)
        } else {
            self.op_cache.remove(key);
            None
        }
    }

    pub fn cache_insert(&mut self, key: OpKey, result: Handle) {
        if self.gc_policy == GcPolicy::Pessimistic {
            for &raw in key.operands.iter().chain(std::iter::once(&result.to_raw())) {
                if let Some(id) = Handle::from_raw(raw, self.range).as_node() {
                    self.slots[usize::from(id)].cache_count += 1;
                }
            }
        }
        self.op_cache.insert(key, result);
    }

    /// Drops every op-cache entry. Under the pessimistic policy this walks
    /// zombies whose cache count reaches zero and reclaims them.
    pub fn clear_op_cache(&mut self) {
        let entries: Vec<OpKey> = self.op_cache.keys().cloned().collect();
        for key in entries {
            if let Some(result) = self.op_cache.remove(&key) {
                let mut touched = Vec::new();
                for &raw in key.operands.iter() {
                    touched.push(raw);
                }
                touched.push(result.to_raw());
                for raw in touched {
                    if let Some(id) = Handle::from_raw(raw, self.range).as_node() {
                        let slot = &mut self.slots[usize::from(id)];
                        if slot.cache_count > 0 {
                            slot.cache_count -= 1;
                        }
                        if slot.zombie && slot.cache_count == 0 && slot.in_count == 0 {
                            self.delete_node(id);
                        }
                    }
                }
            }
        }
    }

    /// Forces a sweep of any pessimistic zombies still hanging around (e.g.
    /// after a batch of `clear_op_cache` calls that left some cache counts
    /// positive because of cross-references between cached results).
    pub fn garbage_collect(&mut self) {
        self.stats.gc_sweeps += 1;
        let zombies: Vec<NodeId> = (0..self.slots.len() as u32)
            .map(NodeId::from_index)
            .filter(|&id| {
                let slot = &self.slots[usize::from(id)];
                slot.zombie && slot.cache_count == 0 && slot.in_count == 0
            })
            .collect();
        tracing::debug!(sweep = self.stats.gc_sweeps, reclaimed = zombies.len(), "garbage_collect sweep");
        for id in zombies {
            self.delete_node(id);
        }
    }

    /// Rebuilds the backing array densely (no holes), remapping every live
    /// node's address. Invalidates nothing observable: handles are node ids,
    /// not addresses.
    pub fn compact(&mut self) {
        self.stats.compactions += 1;
        let before = self.data.len();
        let mut live: Vec<(NodeId, UnpackedNode)> = Vec::new();
        for idx in 0..self.slots.len() as u32 {
            let id = NodeId::from_index(idx);
            if self.free_ids.contains(&idx) {
                continue;
            }
            let addr = self.addr(id);
            if let Ok(node) = self.storage.unpack(&self.data, addr) {
                live.push((id, node));
            }
        }
        let mut new_data = Vec::new();
        for (id, node) in &live {
            let addr = new_data.len();
            let size = self.storage.node_size(node);
            new_data.resize(addr + size, 0);
            self.storage.pack(&mut new_data, addr, node).expect("re-pack of a live node");
            self.slots[usize::from(*id)].addr = addr;
        }
        let after = new_data.len();
        self.data = new_data;
        let len = self.data.len();
        self.holes.clear_holes_and_shrink(&mut self.data, len, false);
        tracing::debug!(live_nodes = live.len(), bytes_before = before, bytes_after = after, "forest compacted");
    }

    /// Fixes the forest's variable order. Only legal before any node has
    /// been created: this engine's planning forests choose their
    /// level/variable interleaving once, up front, via `symvars`, and never
    /// dynamically reorder mid-search — so this rejects being called late
    /// rather than implementing a general sifting algorithm nothing here
    /// needs.
    pub fn reorder_variables(&mut self, permutation: &[Level]) -> DdResult<()> {
        if self.var_order_locked {
            tracing::warn!("reorder_variables rejected: forest already created a node");
            return Err(DdError::InvalidPolicy(
                "variable order is fixed once the forest has created a node".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for lvl in permutation {
            if !seen.insert(lvl.0) {
                return Err(DdError::InvalidArgument("permutation has duplicate levels".into()));
            }
        }
        Ok(())
    }

    pub fn unpack(&self, h: Handle) -> DdResult<UnpackedNode> {
        let id = h
            .as_node()
            .ok_or_else(|| DdError::TypeMismatch { expected: "node handle", found: "terminal" })?;
        self.storage.unpack(&self.data, self.addr(id))
    }

    pub fn level_of(&self, h: Handle) -> Level {
        match h.as_node() {
            Some(id) => self.storage.level(&self.data, self.addr(id)),
            None => Level(0),
        }
    }

    pub fn terminal(&self, t: Terminal) -> Handle {
        Handle::Terminal(t)
    }
}

/// A reference-counted edge into a forest: cloning links the underlying
/// node, dropping unlinks it. Plain terminal handles are cheap copies that
/// never touch the forest.
pub struct DdEdge {
    forest: ForestHandle,
    handle: Handle,
}

impl DdEdge {
    pub fn new(forest: ForestHandle, handle: Handle) -> Self {
        forest.borrow_mut().link(handle);
        DdEdge { forest, handle }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn forest(&self) -> &ForestHandle {
        &self.forest
    }
}

impl Clone for DdEdge {
    fn clone(&self) -> Self {
        DdEdge::new(Rc::clone(&self.forest), self.handle)
    }
}

impl Drop for DdEdge {
    fn drop(&mut self) {
        self.forest.borrow_mut().unlink(self.handle);
    }
}

impl std::fmt::Debug for DdEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdEdge").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ClassicStorage;
    use crate::holes::Grid;

    fn bool_forest(reduction: Reduction, gc: GcPolicy) -> ForestHandle {
        Forest::new(RangeType::Boolean, reduction, gc, Box::new(Grid::default()), Box::new(ClassicStorage))
    }

    #[test]
    fn identical_children_collapse_under_fully_reduction() {
        let forest = bool_forest(Reduction::Fully, GcPolicy::Optimistic);
        let leaf = Handle::Terminal(Terminal::Bool(true));
        let h = forest
            .borrow_mut()
            .create_reduced_node(Level(1), Downs::Full(smallvec::smallvec![leaf.to_raw(), leaf.to_raw()]))
            .unwrap();
        assert_eq!(h, leaf);
    }

    #[test]
    fn identity_reduction_keeps_redundant_nodes_explicit() {
        let forest = bool_forest(Reduction::Identity, GcPolicy::Optimistic);
        let leaf = Handle::Terminal(Terminal::Bool(true));
        let h = forest
            .borrow_mut()
            .create_reduced_node(Level(1), Downs::Full(smallvec::smallvec![leaf.to_raw(), leaf.to_raw()]))
            .unwrap();
        assert!(h.as_node().is_some());
    }

    #[test]
    fn equal_structure_nodes_share_one_unique_table_entry() {
        let forest = bool_forest(Reduction::Fully, GcPolicy::Optimistic);
        let t = Handle::Terminal(Terminal::Bool(true));
        let f = Handle::Terminal(Terminal::Bool(false));
        let a = forest
            .borrow_mut()
            .create_reduced_node(Level(1), Downs::Full(smallvec::smallvec![f.to_raw(), t.to_raw()]))
            .unwrap();
        let b = forest
            .borrow_mut()
            .create_reduced_node(Level(1), Downs::Full(smallvec::smallvec![f.to_raw(), t.to_raw()]))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(forest.borrow().stats.unique_table_hits, 1);
        assert_eq!(forest.borrow().stats.active_nodes, 1);
    }

    #[test]
    fn optimistic_gc_reclaims_on_last_unlink() {
        let forest = bool_forest(Reduction::Fully, GcPolicy::Optimistic);
        let t = Handle::Terminal(Terminal::Bool(true));
        let f = Handle::Terminal(Terminal::Bool(false));
        let handle = {
            let mut fm = forest.borrow_mut();
            let h = fm.create_reduced_node(Level(1), Downs::Full(smallvec::smallvec![f.to_raw(), t.to_raw()])).unwrap();
            fm.link(h);
            h
        };
        assert_eq!(forest.borrow().stats.active_nodes, 1);
        forest.borrow_mut().unlink(handle);
        assert_eq!(forest.borrow().stats.active_nodes, 0);
        assert_eq!(forest.borrow().stats.reclaimed_nodes, 1);
    }

    #[test]
    fn pessimistic_gc_keeps_zombie_until_cache_drops_it() {
        let forest = bool_forest(Reduction::Fully, GcPolicy::Pessimistic);
        let t = Handle::Terminal(Terminal::Bool(true));
        let f = Handle::Terminal(Terminal::Bool(false));
        let h = {
            let mut fm = forest.borrow_mut();
            let h = fm.create_reduced_node(Level(1), Downs::Full(smallvec::smallvec![f.to_raw(), t.to_raw()])).unwrap();
            fm.link(h);
            let key = OpKey::new(0, &[h]);
            fm.cache_insert(key, h);
            h
        };
        forest.borrow_mut().unlink(h);
        assert_eq!(forest.borrow().stats.active_nodes, 0, "zombie no longer counts as active");
        assert_eq!(forest.borrow().stats.reclaimed_nodes, 0, "but the chunk is still held");
        forest.borrow_mut().clear_op_cache();
        assert_eq!(forest.borrow().stats.reclaimed_nodes, 1, "dropping the cache entry frees the zombie");
    }

    #[test]
    fn ddedge_drop_unlinks_automatically() {
        let forest = bool_forest(Reduction::Fully, GcPolicy::Optimistic);
        let t = Handle::Terminal(Terminal::Bool(true));
        let f = Handle::Terminal(Terminal::Bool(false));
        let h = forest
            .borrow_mut()
            .create_reduced_node(Level(1), Downs::Full(smallvec::smallvec![f.to_raw(), t.to_raw()]))
            .unwrap();
        {
            let _edge = DdEdge::new(Rc::clone(&forest), h);
            assert_eq!(forest.borrow().stats.active_nodes, 1);
        }
        assert_eq!(forest.borrow().stats.active_nodes, 0);
    }

    #[test]
    fn reorder_after_node_creation_is_rejected() {
        let forest = bool_forest(Reduction::Fully, GcPolicy::Optimistic);
        let t = Handle::Terminal(Terminal::Bool(true));
        let f = Handle::Terminal(Terminal::Bool(false));
        forest
            .borrow_mut()
            .create_reduced_node(Level(1), Downs::Full(smallvec::smallvec![f.to_raw(), t.to_raw()]))
            .unwrap();
        assert!(forest.borrow_mut().reorder_variables(&[Level(1), Level(2)]).is_err());
    }
}
