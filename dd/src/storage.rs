//! C2 — node storage: the unpacked/packed representation of a single node
//! and the two encodings a forest can pick between.
//!
//! `ClassicStorage` spends one full `i64` slot per field — simple, and the
//! natural choice for edge-valued forests where a down-pointer carries a
//! value alongside it. `CompactStorage` instead measures, per node, the
//! narrowest byte width that fits every down-pointer (`pb`) and every
//! sparse index (`ib`), and bit-packs several fields per slot. Both
//! encodings honour the same [`NodeStorage`] contract so a forest can swap
//! between them without its unique table or GC caring which is active.

use crate::error::{DdError, DdResult};
use crate::handle::{Level, RawHandle};
use smallvec::SmallVec;

/// A node's down-pointers, either dense (one entry per domain value) or
/// sparse (only the non-default entries, paired with their index).
#[derive(Clone, Debug, PartialEq)]
pub enum Downs {
    Full(SmallVec<[RawHandle; 8]>),
    Sparse(SmallVec<[(u32, RawHandle); 8]>),
}

impl Downs {
    pub fn len(&self) -> usize {
        match self {
            Downs::Full(v) => v.len(),
            Downs::Sparse(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates `(index, handle)` regardless of which representation this is.
    pub fn iter_entries(&self) -> Box<dyn Iterator<Item = (u32, RawHandle)> + '_> {
        match self {
            Downs::Full(v) => Box::new(v.iter().enumerate().map(|(i, &h)| (i as u32, h))),
            Downs::Sparse(v) => Box::new(v.iter().copied()),
        }
    }
}

/// A node in unpacked form: easy to build and compare, not yet committed to
/// the flat backing array.
#[derive(Clone, Debug, PartialEq)]
pub struct UnpackedNode {
    pub level: Level,
    pub downs: Downs,
    pub in_count: i32,
}

impl UnpackedNode {
    pub fn new(level: Level, downs: Downs) -> Self {
        UnpackedNode { level, downs, in_count: 0 }
    }
}

/// One-at-a-time (Bob Jenkins) stream hash, the same mixing the original
/// node-canonicalization scheme uses. Deliberately not `std::hash` /
/// SipHash: the unique table's hash order is an observable property tests
/// rely on, not an implementation detail we can delegate to libstd's
/// randomized default.
pub struct JenkinsHasher(u32);

impl JenkinsHasher {
    pub fn new() -> Self {
        JenkinsHasher(0)
    }

    pub fn write_i64(&mut self, v: i64) {
        for byte in v.to_le_bytes() {
            self.write_u8(byte);
        }
    }

    pub fn write_u32(&mut self, v: u32) {
        for byte in v.to_le_bytes() {
            self.write_u8(byte);
        }
    }

    pub fn write_u8(&mut self, byte: u8) {
        self.0 = self.0.wrapping_add(byte as u32);
        self.0 = self.0.wrapping_add(self.0 << 10);
        self.0 ^= self.0 >> 6;
    }

    pub fn finish(mut self) -> u64 {
        self.0 = self.0.wrapping_add(self.0 << 3);
        self.0 ^= self.0 >> 11;
        self.0 = self.0.wrapping_add(self.0 << 15);
        self.0 as u64
    }
}

impl Default for JenkinsHasher {
    fn default() -> Self {
        Self::new()
    }
}

pub fn hash_node(node: &UnpackedNode) -> u64 {
    let mut h = JenkinsHasher::new();
    h.write_i64(node.level.0 as i64);
    match &node.downs {
        Downs::Full(v) => {
            h.write_u8(0);
            for &d in v {
                h.write_i64(d);
            }
        }
        Downs::Sparse(v) => {
            h.write_u8(1);
            for &(idx, d) in v {
                h.write_u32(idx);
                h.write_i64(d);
            }
        }
    }
    h.finish()
}

/// Common contract for packing/unpacking nodes into a forest's flat `i64`
/// backing array.
pub trait NodeStorage {
    /// Number of `i64` slots `node` would occupy once packed, including the
    /// header and the eventual hole sentinels (the caller adds those).
    fn node_size(&self, node: &UnpackedNode) -> usize;

    /// Writes `node`'s encoding into `data[addr..]`, which the caller has
    /// already sized via [`crate::holes::HoleManager::request_chunk`].
    fn pack(&self, data: &mut [i64], addr: usize, node: &UnpackedNode) -> DdResult<()>;

    /// Reconstructs the unpacked form of the node stored at `addr`.
    fn unpack(&self, data: &[i64], addr: usize) -> DdResult<UnpackedNode>;

    fn in_count(&self, data: &[i64], addr: usize) -> i32;

    fn set_in_count(&self, data: &mut [i64], addr: usize, count: i32);

    fn level(&self, data: &[i64], addr: usize) -> Level;

    fn name(&self) -> &'static str;
}

/// Header layout shared by both encodings: `[level, in_count, ...]`. Both
/// storages keep these two fields in full words since they are read on
/// every GC sweep and every `create_reduced_node` lookup; only the
/// down-pointer payload differs between encodings.
const HEADER_LEN: usize = 2;

fn read_header(data: &[i64], addr: usize) -> (Level, i32) {
    (Level(data[addr] as i32), data[addr + 1] as i32)
}

fn write_header(data: &mut [i64], addr: usize, level: Level, in_count: i32) {
    data[addr] = level.0 as i64;
    data[addr + 1] = in_count as i64;
}

/// Full-word encoding: `[level, in_count, kind, count, entries...]`, one
/// `i64` slot per field. `kind` is `0` for `Full` downs, `1` for `Sparse`;
/// sparse entries occupy two slots each (`index`, `handle`).
#[derive(Default)]
pub struct ClassicStorage;

impl NodeStorage for ClassicStorage {
    fn node_size(&self, node: &UnpackedNode) -> usize {
        let payload = match &node.downs {
            Downs::Full(v) => v.len(),
            Downs::Sparse(v) => v.len() * 2,
        };
        HEADER_LEN + 2 + payload
    }

    fn pack(&self, data: &mut [i64], addr: usize, node: &UnpackedNode) -> DdResult<()> {
        write_header(data, addr, node.level, node.in_count);
        let mut cur = addr + HEADER_LEN;
        match &node.downs {
            Downs::Full(v) => {
                data[cur] = 0;
                data[cur + 1] = v.len() as i64;
                cur += 2;
                for &d in v {
                    data[cur] = d;
                    cur += 1;
                }
            }
            Downs::Sparse(v) => {
                data[cur] = 1;
                data[cur + 1] = v.len() as i64;
                cur += 2;
                for &(idx, d) in v {
                    data[cur] = idx as i64;
                    data[cur + 1] = d;
                    cur += 2;
                }
            }
        }
        Ok(())
    }

    fn unpack(&self, data: &[i64], addr: usize) -> DdResult<UnpackedNode> {
        let (level, in_count) = read_header(data, addr);
        let kind = data[addr + HEADER_LEN];
        let count = data[addr + HEADER_LEN + 1] as usize;
        let mut cur = addr + HEADER_LEN + 2;
        let downs = if kind == 0 {
            let mut v = SmallVec::with_capacity(count);
            for _ in 0..count {
                v.push(data[cur]);
                cur += 1;
            }
            Downs::Full(v)
        } else if kind == 1 {
            let mut v = SmallVec::with_capacity(count);
            for _ in 0..count {
                v.push((data[cur] as u32, data[cur + 1]));
                cur += 2;
            }
            Downs::Sparse(v)
        } else {
            return Err(DdError::Miscellaneous(format!("corrupt node kind tag {kind} at {addr}")));
        };
        Ok(UnpackedNode { level, downs, in_count })
    }

    fn in_count(&self, data: &[i64], addr: usize) -> i32 {
        data[addr + 1] as i32
    }

    fn set_in_count(&self, data: &mut [i64], addr: usize, count: i32) {
        data[addr + 1] = count as i64;
    }

    fn level(&self, data: &[i64], addr: usize) -> Level {
        Level(data[addr] as i32)
    }

    fn name(&self) -> &'static str {
        "classic"
    }
}

/// Byte width needed to losslessly round-trip a signed value through
/// sign-extension: the smallest of 1/2/4/8 whose range covers `v`.
fn width_for(v: i64) -> u8 {
    if v >= -(1 << 7) && v < (1 << 7) {
        1
    } else if v >= -(1 << 15) && v < (1 << 15) {
        2
    } else if v >= -(1i64 << 31) && v < (1i64 << 31) {
        4
    } else {
        8
    }
}

fn mask_for(width: u8) -> u64 {
    if width == 8 {
        u64::MAX
    } else {
        (1u64 << (width as u32 * 8)) - 1
    }
}

/// Packs `values` at `width` bytes apiece into as few `i64` words as fit,
/// tightly, most-significant entry last within a word.
fn pack_values(values: &[i64], width: u8) -> Vec<i64> {
    let per_word = (8 / width as usize).max(1);
    let mask = mask_for(width);
    values
        .chunks(per_word)
        .map(|chunk| {
            let mut word: u64 = 0;
            for (i, &v) in chunk.iter().enumerate() {
                word |= ((v as u64) & mask) << (i * width as usize * 8);
            }
            word as i64
        })
        .collect()
}

fn sign_extend(raw: u64, width: u8) -> i64 {
    let bits = width as u32 * 8;
    if bits == 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    (((raw << shift) as i64) >> shift) as i64
}

fn unpack_values(words: &[i64], width: u8, count: usize) -> Vec<i64> {
    let per_word = (8 / width as usize).max(1);
    let mask = mask_for(width);
    let mut out = Vec::with_capacity(count);
    'outer: for &word in words {
        let word = word as u64;
        for i in 0..per_word {
            if out.len() == count {
                break 'outer;
            }
            let raw = (word >> (i * width as usize * 8)) & mask;
            out.push(sign_extend(raw, width));
        }
    }
    out
}

fn words_needed(count: usize, width: u8) -> usize {
    let per_word = (8 / width as usize).max(1);
    count.div_ceil(per_word)
}

/// `meta` word layout: `kind(1 bit) | pb(4 bits) | ib(4 bits) | count(rest)`.
/// `pb`/`ib` store the byte width directly (1/2/4/8), which fits in 4 bits.
fn pack_meta(kind: u8, pb: u8, ib: u8, count: u32) -> i64 {
    (kind as i64) | ((pb as i64) << 1) | ((ib as i64) << 5) | ((count as i64) << 9)
}

fn unpack_meta(meta: i64) -> (u8, u8, u8, u32) {
    let meta = meta as u64;
    let kind = (meta & 0x1) as u8;
    let pb = ((meta >> 1) & 0xF) as u8;
    let ib = ((meta >> 5) & 0xF) as u8;
    let count = (meta >> 9) as u32;
    (kind, pb, ib, count)
}

/// Byte-packed encoding: `[level, in_count, meta, packed-indices?, packed-handles]`.
/// Chosen per node: `pb` is the narrowest width covering every down-pointer,
/// `ib` the narrowest covering every sparse index (unused, stored as `0`,
/// for `Full` nodes).
#[derive(Default)]
pub struct CompactStorage;

impl CompactStorage {
    fn measure(node: &UnpackedNode) -> (u8, u8, Vec<i64>, Vec<i64>) {
        match &node.downs {
            Downs::Full(v) => {
                let pb = v.iter().copied().map(width_for).max().unwrap_or(1);
                (pb, 0, Vec::new(), v.to_vec())
            }
            Downs::Sparse(v) => {
                let pb = v.iter().map(|&(_, h)| width_for(h)).max().unwrap_or(1);
                let ib = v.iter().map(|&(i, _)| width_for(i as i64)).max().unwrap_or(1);
                let idxs: Vec<i64> = v.iter().map(|&(i, _)| i as i64).collect();
                let handles: Vec<i64> = v.iter().map(|&(_, h)| h).collect();
                (pb, ib, idxs, handles)
            }
        }
    }
}

impl NodeStorage for CompactStorage {
    fn node_size(&self, node: &UnpackedNode) -> usize {
        let (pb, ib, idxs, handles) = Self::measure(node);
        let idx_words = if ib == 0 { 0 } else { words_needed(idxs.len(), ib) };
        HEADER_LEN + 1 + idx_words + words_needed(handles.len(), pb)
    }

    fn pack(&self, data: &mut [i64], addr: usize, node: &UnpackedNode) -> DdResult<()> {
        write_header(data, addr, node.level, node.in_count);
        let kind = match node.downs {
            Downs::Full(_) => 0,
            Downs::Sparse(_) => 1,
        };
        let (pb, ib, idxs, handles) = Self::measure(node);
        let count = node.downs.len() as u32;
        data[addr + HEADER_LEN] = pack_meta(kind, pb, ib, count);
        let mut cur = addr + HEADER_LEN + 1;
        if kind == 1 {
            for w in pack_values(&idxs, ib) {
                data[cur] = w;
                cur += 1;
            }
        }
        for w in pack_values(&handles, pb) {
            data[cur] = w;
            cur += 1;
        }
        Ok(())
    }

    fn unpack(&self, data: &[i64], addr: usize) -> DdResult<UnpackedNode> {
        let (level, in_count) = read_header(data, addr);
        let (kind, pb, ib, count) = unpack_meta(data[addr + HEADER_LEN]);
        let count = count as usize;
        let mut cur = addr + HEADER_LEN + 1;
        let downs = if kind == 0 {
            let hwords = words_needed(count, pb);
            let handles = unpack_values(&data[cur..cur + hwords], pb, count);
            Downs::Full(handles.into_iter().collect())
        } else {
            let iwords = words_needed(count, ib);
            let idxs = unpack_values(&data[cur..cur + iwords], ib, count);
            cur += iwords;
            let hwords = words_needed(count, pb);
            let handles = unpack_values(&data[cur..cur + hwords], pb, count);
            Downs::Sparse(idxs.into_iter().map(|i| i as u32).zip(handles).collect())
        };
        Ok(UnpackedNode { level, downs, in_count })
    }

    fn in_count(&self, data: &[i64], addr: usize) -> i32 {
        data[addr + 1] as i32
    }

    fn set_in_count(&self, data: &mut [i64], addr: usize, count: i32) {
        data[addr + 1] = count as i64;
    }

    fn level(&self, data: &[i64], addr: usize) -> Level {
        Level(data[addr] as i32)
    }

    fn name(&self) -> &'static str {
        "compact"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Level;

    fn full_node(level: i32, downs: &[i64]) -> UnpackedNode {
        UnpackedNode::new(Level(level), Downs::Full(downs.iter().copied().collect()))
    }

    fn sparse_node(level: i32, downs: &[(u32, i64)]) -> UnpackedNode {
        UnpackedNode::new(Level(level), Downs::Sparse(downs.iter().copied().collect()))
    }

    fn round_trip(storage: &dyn NodeStorage, node: &UnpackedNode) {
        let mut node = node.clone();
        node.in_count = 3;
        let mut data = vec![0i64; storage.node_size(&node) + 4];
        storage.pack(&mut data, 0, &node).unwrap();
        let back = storage.unpack(&data, 0).unwrap();
        assert_eq!(back, node);
        assert_eq!(storage.in_count(&data, 0), 3);
        assert_eq!(storage.level(&data, 0), node.level);
    }

    #[test]
    fn classic_round_trips_full_and_sparse() {
        round_trip(&ClassicStorage, &full_node(5, &[-1, -1, 7, 9]));
        round_trip(&ClassicStorage, &sparse_node(5, &[(0, -1), (3, 99999)]));
    }

    #[test]
    fn compact_round_trips_full_and_sparse() {
        round_trip(&CompactStorage, &full_node(5, &[-1, -1, 7, 9]));
        round_trip(&CompactStorage, &sparse_node(5, &[(0, -1), (3, 99999)]));
        round_trip(&CompactStorage, &full_node(2, &[i64::from(i32::MIN) - 1, i64::from(i32::MAX) + 1]));
    }

    #[test]
    fn compact_picks_narrow_width_for_small_handles() {
        let node = full_node(1, &[0, 1, -1, 2]);
        let size_small = CompactStorage.node_size(&node);
        let big = full_node(1, &[0, 1, -1, i64::MAX / 2]);
        let size_big = CompactStorage.node_size(&big);
        assert!(size_small < size_big);
    }

    #[test]
    fn jenkins_hash_is_deterministic_and_sensitive_to_level() {
        let a = full_node(1, &[1, 2, 3]);
        let b = full_node(2, &[1, 2, 3]);
        assert_eq!(hash_node(&a), hash_node(&a));
        assert_ne!(hash_node(&a), hash_node(&b));
    }
}
