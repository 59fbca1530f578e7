//! C1 — hole manager: chunk allocation inside the forest's flat backing
//! array. Four interchangeable strategies share one contract
//! (`spec.md §4.1`); callers only ever see [`HoleManager`].
//!
//! A hole is a contiguous slice of the backing array whose first and last
//! slots both hold the sentinel `-length`. `request_chunk`/`recycle_chunk`
//! keep those sentinels authoritative in the array itself (so
//! `chunk_after_hole` and corruption checks never need anything but the
//! array); the bookkeeping data structures below (free lists, the
//! size-ordered grid, the address-ordered heaps) are a side index over that
//! ground truth, not a replacement for it.

use env_param::EnvParam;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::cmp::Reverse;

use crate::error::{DdError, DdResult};

/// Holes smaller than this are tracked exactly by size; holes at or above it
/// go into the "large hole" bucket of the strategy.
pub static LARGE: EnvParam<usize> = EnvParam::new("SYMPLAN_DD_LARGE_HOLE", "128");

/// Holes smaller than this cannot be tracked at all: on recycle they become
/// untracked padding, reclaimable only by merging with a neighbour.
pub static SMALLEST_CHUNK: EnvParam<usize> = EnvParam::new("SYMPLAN_DD_SMALLEST_CHUNK", "3");

fn write_sentinels(data: &mut [i64], addr: usize, len: usize) {
    let sentinel = -(len as i64);
    data[addr] = sentinel;
    data[addr + len - 1] = sentinel;
}

fn hole_len_at(data: &[i64], addr: usize) -> Option<usize> {
    let v = data[addr];
    if v < 0 {
        Some((-v) as usize)
    } else {
        None
    }
}

/// Reads the header sentinel at `addr` and validates it against the trailer;
/// fatal (per spec) if the layout is corrupt.
pub fn validated_hole_len(data: &[i64], addr: usize) -> DdResult<usize> {
    let len = hole_len_at(data, addr).ok_or_else(|| DdError::Miscellaneous(format!("no hole header at {addr}")))?;
    if addr + len > data.len() || data[addr + len - 1] != -(len as i64) {
        return Err(DdError::Miscellaneous(format!("mismatched hole sentinels at {addr}")));
    }
    Ok(len)
}

/// Common contract implemented by all four hole-management strategies.
pub trait HoleManager {
    /// Returns the address of a contiguous region of at least `n` slots,
    /// marking it used (header sentinel left as `-actual_length` until the
    /// caller overwrites it).
    fn request_chunk(&mut self, data: &mut Vec<i64>, n: usize) -> DdResult<usize>;

    /// Marks `n` slots starting at `addr` as a hole, merging with
    /// neighbouring holes where the strategy supports it, and returns
    /// trailing holes to the unallocated tail.
    fn recycle_chunk(&mut self, data: &mut Vec<i64>, addr: usize, n: usize);

    /// Reads the trailer of the hole starting at `addr` and returns the
    /// following chunk's address.
    fn chunk_after_hole(&self, data: &[i64], addr: usize) -> DdResult<usize> {
        let len = validated_hole_len(data, addr)?;
        Ok(addr + len)
    }

    /// Invoked after a forest compaction: forgets all tracked holes and
    /// optionally shrinks the backing array towards `new_last`.
    fn clear_holes_and_shrink(&mut self, data: &mut Vec<i64>, new_last: usize, shrink: bool);

    fn name(&self) -> &'static str;
}

fn grow_for(data: &mut Vec<i64>, addr: usize, n: usize) {
    if addr + n > data.len() {
        data.resize(addr + n, 0);
    }
}

/// Absorbs a trailing hole into the unallocated tail, i.e. if the given hole
/// runs to the end of `data`, truncate it away instead of keeping it live.
fn reclaim_if_trailing(data: &mut Vec<i64>, addr: usize, len: usize) -> bool {
    if addr + len == data.len() {
        data.truncate(addr);
        true
    } else {
        false
    }
}

/// After consuming `used` slots of a hole of total size `len` at `addr`, the
/// leftover (if any) is either reinserted as a new, smaller hole or — if
/// smaller than `smallest_chunk` — left as untracked padding.
fn leftover(addr: usize, len: usize, used: usize) -> Option<(usize, usize)> {
    let rem = len - used;
    if rem == 0 {
        None
    } else {
        Some((addr + used, rem))
    }
}

/// Strategy 1: holes are not tracked at all. Only trailing holes (those that
/// touch the end of the backing array) are reclaimed.
#[derive(Default)]
pub struct NoneTracked;

impl HoleManager for NoneTracked {
    fn request_chunk(&mut self, data: &mut Vec<i64>, n: usize) -> DdResult<usize> {
        let addr = data.len();
        grow_for(data, addr, n);
        write_sentinels(data, addr, n);
        Ok(addr)
    }

    fn recycle_chunk(&mut self, data: &mut Vec<i64>, addr: usize, n: usize) {
        write_sentinels(data, addr, n);
        reclaim_if_trailing(data, addr, n);
    }

    fn clear_holes_and_shrink(&mut self, data: &mut Vec<i64>, new_last: usize, shrink: bool) {
        data.truncate(new_last);
        if shrink {
            data.shrink_to(new_last / 2);
        }
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Strategy 2: a doubly-linked free list per exact size (< LARGE), plus one
/// linear list of large holes. We index the lists with plain `VecDeque`s
/// keyed on size; the header/trailer sentinels in `data` remain the ground
/// truth that `chunk_after_hole`/compaction-time validation rely on.
#[derive(Default)]
pub struct ArrayOfLists {
    by_size: BTreeMap<usize, VecDeque<usize>>,
    large: VecDeque<usize>,
}

impl ArrayOfLists {
    fn track(&mut self, addr: usize, len: usize) {
        if len >= LARGE.get() {
            self.large.push_back(addr);
        } else {
            self.by_size.entry(len).or_default().push_back(addr);
        }
    }

    fn untrack_exact(&mut self, addr: usize, len: usize) -> bool {
        if len >= LARGE.get() {
            if let Some(pos) = self.large.iter().position(|&a| a == addr) {
                self.large.remove(pos);
                return true;
            }
            false
        } else if let Some(list) = self.by_size.get_mut(&len) {
            if let Some(pos) = list.iter().position(|&a| a == addr) {
                list.remove(pos);
                return true;
            }
            false
        } else {
            false
        }
    }
}

impl HoleManager for ArrayOfLists {
    fn request_chunk(&mut self, data: &mut Vec<i64>, n: usize) -> DdResult<usize> {
        if let Some(list) = self.by_size.get_mut(&n) {
            if let Some(addr) = list.pop_front() {
                write_sentinels(data, addr, n);
                return Ok(addr);
            }
        }
        if let Some(pos) = self.large.iter().position(|&addr| {
            hole_len_at(data, addr).map(|l| l >= n).unwrap_or(false)
        }) {
            let addr = self.large.remove(pos).unwrap();
            let len = hole_len_at(data, addr).unwrap();
            write_sentinels(data, addr, n);
            if let Some((laddr, llen)) = leftover(addr, len, n) {
                if llen < SMALLEST_CHUNK.get() {
                    write_sentinels(data, laddr, llen);
                } else {
                    write_sentinels(data, laddr, llen);
                    self.track(laddr, llen);
                }
            }
            return Ok(addr);
        }
        let addr = data.len();
        grow_for(data, addr, n);
        write_sentinels(data, addr, n);
        Ok(addr)
    }

    fn recycle_chunk(&mut self, data: &mut Vec<i64>, mut addr: usize, mut n: usize) {
        write_sentinels(data, addr, n);
        // merge with the following neighbour if it is a hole
        if addr + n < data.len() {
            if let Some(next_len) = hole_len_at(data, addr + n) {
                if self.untrack_exact(addr + n, next_len) {
                    n += next_len;
                    write_sentinels(data, addr, n);
                }
            }
        }
        // merge with the preceding neighbour if its trailer says it is a hole
        if addr > 0 {
            if let Some(prev_len) = hole_len_at(data, addr - 1) {
                let prev_addr = addr - prev_len;
                if self.untrack_exact(prev_addr, prev_len) {
                    addr = prev_addr;
                    n += prev_len;
                    write_sentinels(data, addr, n);
                }
            }
        }
        if reclaim_if_trailing(data, addr, n) {
            return;
        }
        if n < SMALLEST_CHUNK.get() {
            return; // too small to track; stays as untracked padding
        }
        self.track(addr, n);
    }

    fn clear_holes_and_shrink(&mut self, data: &mut Vec<i64>, new_last: usize, shrink: bool) {
        self.by_size.clear();
        self.large.clear();
        data.truncate(new_last);
        if shrink {
            data.shrink_to(new_last / 2);
        }
    }

    fn name(&self) -> &'static str {
        "array-of-lists"
    }
}

/// Strategy 3: a size-ascending "grid". Each distinct size has one bucket;
/// requests scan buckets from the first size `>= n` upward, and large holes
/// (size `>= LARGE`) form their own address-ordered bucket scanned linearly.
#[derive(Default)]
pub struct Grid {
    grid: BTreeMap<usize, VecDeque<usize>>,
    large: Vec<usize>,
}

impl Grid {
    fn track(&mut self, addr: usize, len: usize) {
        if len >= LARGE.get() {
            self.large.push(addr);
        } else {
            self.grid.entry(len).or_default().push_back(addr);
        }
    }

    fn untrack_exact(&mut self, addr: usize, len: usize) -> bool {
        if len >= LARGE.get() {
            if let Some(pos) = self.large.iter().position(|&a| a == addr) {
                self.large.remove(pos);
                true
            } else {
                false
            }
        } else if let Some(bucket) = self.grid.get_mut(&len) {
            if let Some(pos) = bucket.iter().position(|&a| a == addr) {
                bucket.remove(pos);
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    fn first_fit(&mut self, n: usize) -> Option<(usize, usize)> {
        let found = self.grid.range(n..).next().map(|(&len, _)| len);
        if let Some(len) = found {
            let addr = self.grid.get_mut(&len).unwrap().pop_front().unwrap();
            if self.grid[&len].is_empty() {
                self.grid.remove(&len);
            }
            return Some((addr, len));
        }
        None
    }
}

impl HoleManager for Grid {
    fn request_chunk(&mut self, data: &mut Vec<i64>, n: usize) -> DdResult<usize> {
        if let Some((addr, len)) = self.first_fit(n) {
            write_sentinels(data, addr, n);
            if let Some((laddr, llen)) = leftover(addr, len, n) {
                write_sentinels(data, laddr, llen);
                if llen >= SMALLEST_CHUNK.get() {
                    self.track(laddr, llen);
                }
            }
            return Ok(addr);
        }
        if let Some(pos) = self
            .large
            .iter()
            .position(|&addr| hole_len_at(data, addr).map(|l| l >= n).unwrap_or(false))
        {
            let addr = self.large.remove(pos);
            let len = hole_len_at(data, addr).unwrap();
            write_sentinels(data, addr, n);
            if let Some((laddr, llen)) = leftover(addr, len, n) {
                write_sentinels(data, laddr, llen);
                if llen >= SMALLEST_CHUNK.get() {
                    self.track(laddr, llen);
                }
            }
            return Ok(addr);
        }
        let addr = data.len();
        grow_for(data, addr, n);
        write_sentinels(data, addr, n);
        Ok(addr)
    }

    fn recycle_chunk(&mut self, data: &mut Vec<i64>, mut addr: usize, mut n: usize) {
        write_sentinels(data, addr, n);
        if addr + n < data.len() {
            if let Some(next_len) = hole_len_at(data, addr + n) {
                if self.untrack_exact(addr + n, next_len) {
                    n += next_len;
                    write_sentinels(data, addr, n);
                }
            }
        }
        if addr > 0 {
            if let Some(prev_len) = hole_len_at(data, addr - 1) {
                let prev_addr = addr - prev_len;
                if self.untrack_exact(prev_addr, prev_len) {
                    addr = prev_addr;
                    n += prev_len;
                    write_sentinels(data, addr, n);
                }
            }
        }
        if reclaim_if_trailing(data, addr, n) {
            return;
        }
        if n < SMALLEST_CHUNK.get() {
            return;
        }
        self.track(addr, n);
    }

    fn clear_holes_and_shrink(&mut self, data: &mut Vec<i64>, new_last: usize, shrink: bool) {
        self.grid.clear();
        self.large.clear();
        data.truncate(new_last);
        if shrink {
            data.shrink_to(new_last / 2);
        }
    }

    fn name(&self) -> &'static str {
        "grid"
    }
}

/// Strategy 4: like `Grid`, but each same-size bucket is a binary min-heap
/// ordered by address (earliest address wins), and large holes form a heap
/// too. Mirrors the address-ordered `IdxHeap` pattern used elsewhere in this
/// workspace for priority structures, specialised to "smallest address
/// first" instead of "smallest priority first".
#[derive(Default)]
pub struct HeapPerSize {
    buckets: BTreeMap<usize, BinaryHeap<Reverse<usize>>>,
    large: BinaryHeap<Reverse<usize>>,
    large_set: hashbrown::HashSet<usize>,
}

impl HeapPerSize {
    fn track(&mut self, addr: usize, len: usize) {
        if len >= LARGE.get() {
            self.large.push(Reverse(addr));
            self.large_set.insert(addr);
        } else {
            self.buckets.entry(len).or_default().push(Reverse(addr));
        }
    }

    fn untrack_exact(&mut self, data: &[i64], addr: usize, len: usize) -> bool {
        if len >= LARGE.get() {
            if self.large_set.remove(&addr) {
                self.rebuild_large(data);
                true
            } else {
                false
            }
        } else if let Some(heap) = self.buckets.get_mut(&len) {
            if heap.iter().any(|Reverse(a)| *a == addr) {
                let items: Vec<usize> = heap.drain().map(|Reverse(a)| a).filter(|&a| a != addr).collect();
                if items.is_empty() {
                    self.buckets.remove(&len);
                } else {
                    *self.buckets.get_mut(&len).unwrap() = items.into_iter().map(Reverse).collect();
                }
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    fn rebuild_large(&mut self, data: &[i64]) {
        self.large = self
            .large_set
            .iter()
            .copied()
            .filter(|&a| hole_len_at(data, a).is_some())
            .map(Reverse)
            .collect();
    }

    fn pop_large_fit(&mut self, data: &[i64], n: usize) -> Option<(usize, usize)> {
        // Pop candidates by address until one actually fits; addresses that
        // no longer head a valid large hole are simply dropped.
        let mut parked = Vec::new();
        let mut result = None;
        while let Some(Reverse(addr)) = self.large.pop() {
            if !self.large_set.contains(&addr) {
                continue;
            }
            let Some(len) = hole_len_at(data, addr) else { continue };
            if len >= n {
                self.large_set.remove(&addr);
                result = Some((addr, len));
                break;
            } else {
                parked.push(Reverse(addr));
            }
        }
        for item in parked {
            self.large.push(item);
        }
        result
    }
}

impl HoleManager for HeapPerSize {
    fn request_chunk(&mut self, data: &mut Vec<i64>, n: usize) -> DdResult<usize> {
        if let Some(heap) = self.buckets.get_mut(&n) {
            if let Some(Reverse(addr)) = heap.pop() {
                if heap.is_empty() {
                    self.buckets.remove(&n);
                }
                write_sentinels(data, addr, n);
                return Ok(addr);
            }
        }
        if let Some((addr, len)) = self.pop_large_fit(data, n) {
            write_sentinels(data, addr, n);
            if let Some((laddr, llen)) = leftover(addr, len, n) {
                write_sentinels(data, laddr, llen);
                if llen >= SMALLEST_CHUNK.get() {
                    self.track(laddr, llen);
                }
            }
            return Ok(addr);
        }
        let addr = data.len();
        grow_for(data, addr, n);
        write_sentinels(data, addr, n);
        Ok(addr)
    }

    fn recycle_chunk(&mut self, data: &mut Vec<i64>, mut addr: usize, mut n: usize) {
        write_sentinels(data, addr, n);
        if addr + n < data.len() {
            if let Some(next_len) = hole_len_at(data, addr + n) {
                if self.untrack_exact(data, addr + n, next_len) {
                    n += next_len;
                    write_sentinels(data, addr, n);
                }
            }
        }
        if addr > 0 {
            if let Some(prev_len) = hole_len_at(data, addr - 1) {
                let prev_addr = addr - prev_len;
                if self.untrack_exact(data, prev_addr, prev_len) {
                    addr = prev_addr;
                    n += prev_len;
                    write_sentinels(data, addr, n);
                }
            }
        }
        if reclaim_if_trailing(data, addr, n) {
            return;
        }
        if n < SMALLEST_CHUNK.get() {
            return;
        }
        self.track(addr, n);
    }

    fn clear_holes_and_shrink(&mut self, data: &mut Vec<i64>, new_last: usize, shrink: bool) {
        self.buckets.clear();
        self.large.clear();
        self.large_set.clear();
        data.truncate(new_last);
        if shrink {
            data.shrink_to(new_last / 2);
        }
    }

    fn name(&self) -> &'static str {
        "heap-per-size"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(mut mgr: impl HoleManager) {
        let mut data = Vec::new();
        let a = mgr.request_chunk(&mut data, 10).unwrap();
        let b = mgr.request_chunk(&mut data, 10).unwrap();
        assert_ne!(a, b);
        mgr.recycle_chunk(&mut data, a, 10);
        // a fresh request of the same exact size should reuse `a`, not grow the array.
        let len_before = data.len();
        let c = mgr.request_chunk(&mut data, 10).unwrap();
        assert_eq!(c, a);
        assert_eq!(data.len(), len_before);
    }

    #[test]
    fn all_strategies_reuse_exact_size_holes() {
        exercise(NoneTracked);
        exercise(ArrayOfLists::default());
        exercise(Grid::default());
        exercise(HeapPerSize::default());
    }

    #[test]
    fn leftover_smaller_than_smallest_chunk_is_not_tracked() {
        let mut mgr = Grid::default();
        let mut data = Vec::new();
        let addr = mgr.request_chunk(&mut data, 20).unwrap();
        mgr.recycle_chunk(&mut data, addr, 20);
        // request slightly less than the hole so the leftover is 1 slot, below
        // smallest_chunk (default 3): the leftover must not be independently
        // satisfiable by a later unrelated request of size 1.
        let len_before = data.len();
        let _ = mgr.request_chunk(&mut data, 19).unwrap();
        assert!(data.len() >= len_before);
        assert!(mgr.grid.get(&1).is_none());
    }

    #[test]
    fn trailing_hole_is_absorbed_on_recycle() {
        let mut mgr = ArrayOfLists::default();
        let mut data = Vec::new();
        let addr = mgr.request_chunk(&mut data, 10).unwrap();
        mgr.recycle_chunk(&mut data, addr, 10);
        assert_eq!(data.len(), 0);
    }

    #[test]
    fn adjacent_holes_merge_on_recycle() {
        let mut mgr = Grid::default();
        let mut data = Vec::new();
        let a = mgr.request_chunk(&mut data, 10).unwrap();
        let b = mgr.request_chunk(&mut data, 10).unwrap();
        let tail = mgr.request_chunk(&mut data, 5).unwrap(); // keep `b` from being trailing
        mgr.recycle_chunk(&mut data, a, 10);
        mgr.recycle_chunk(&mut data, b, 10);
        // the merged hole covering [a, tail) must be requestable as one 20-slot chunk
        let merged = mgr.request_chunk(&mut data, 20).unwrap();
        assert_eq!(merged, a);
        let _ = tail;
    }
}
