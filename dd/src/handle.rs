//! Node handles and the terminal-value encoding shared by every forest flavor.
//!
//! A handle is a signed integer: non-negative values index a live node in a
//! forest's address table, negative values are terminals. The terminal's
//! value is bit-stolen into the negative range so that handles stay a single
//! machine word end to end (the same trick the chunk encoding in
//! [`crate::storage`] uses for packed down-pointers).

use std::num::NonZeroU32;

/// Raw, on-the-wire representation of a [`Handle`]: what gets packed into a
/// chunk's down-pointer slot.
pub type RawHandle = i64;

/// Index of a live (non-terminal) node inside one forest's address table.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    pub fn from_index(index: u32) -> Self {
        NodeId(NonZeroU32::new(index + 1).expect("index overflow"))
    }

    pub fn index(self) -> u32 {
        self.0.get() - 1
    }
}

impl From<NodeId> for usize {
    fn from(id: NodeId) -> Self {
        id.index() as usize
    }
}

/// The range type of a forest: what its terminal nodes carry.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RangeType {
    Boolean,
    Integer,
    Float,
}

/// A terminal value. `Bool` is the classic BDD terminal; `Int`/`Float`
/// back ADDs and edge-valued forests.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Terminal {
    Bool(bool),
    Int(i32),
    /// `None` denotes the "omega"/infinity terminal used as the transparent
    /// value of max-style edge-valued forests.
    Float(Option<f32>),
}

impl Terminal {
    pub fn range_type(self) -> RangeType {
        match self {
            Terminal::Bool(_) => RangeType::Boolean,
            Terminal::Int(_) => RangeType::Integer,
            Terminal::Float(_) => RangeType::Float,
        }
    }

    /// Encode into the negative range of a [`RawHandle`].
    ///
    /// Layout (low to high bit): bit 0 is the terminal's sign (1 = negative
    /// or "infinite"), the remaining bits are the magnitude. Zero magnitude
    /// with sign 0 is the canonical "default" terminal (false / 0 / +inf).
    fn encode_magnitude(sign: bool, magnitude: u32) -> RawHandle {
        let packed = ((magnitude as i64) << 1) | (sign as i64);
        -(packed + 1)
    }

    fn decode_magnitude(raw: RawHandle) -> (bool, u32) {
        let packed = (-raw) - 1;
        let sign = (packed & 1) != 0;
        let magnitude = (packed >> 1) as u32;
        (sign, magnitude)
    }

    pub fn to_raw(self) -> RawHandle {
        match self {
            Terminal::Bool(false) => Self::encode_magnitude(false, 0),
            Terminal::Bool(true) => Self::encode_magnitude(true, 0),
            Terminal::Int(v) => Self::encode_magnitude(v < 0, v.unsigned_abs()),
            Terminal::Float(None) => Self::encode_magnitude(true, u32::MAX),
            Terminal::Float(Some(v)) => Self::encode_magnitude(v.is_sign_negative(), v.to_bits()),
        }
    }

    pub fn from_raw(raw: RawHandle, range: RangeType) -> Self {
        debug_assert!(raw < 0, "not a terminal handle: {raw}");
        let (sign, magnitude) = Self::decode_magnitude(raw);
        match range {
            RangeType::Boolean => Terminal::Bool(sign),
            RangeType::Integer => {
                if sign {
                    Terminal::Int(-(magnitude as i32))
                } else {
                    Terminal::Int(magnitude as i32)
                }
            }
            RangeType::Float => {
                if sign && magnitude == u32::MAX {
                    Terminal::Float(None)
                } else {
                    Terminal::Float(Some(f32::from_bits(magnitude)))
                }
            }
        }
    }

    /// The forest's transparent/default value: false, 0, or +infinity.
    pub fn transparent(range: RangeType) -> Self {
        match range {
            RangeType::Boolean => Terminal::Bool(false),
            RangeType::Integer => Terminal::Int(0),
            RangeType::Float => Terminal::Float(None),
        }
    }

    pub fn is_transparent(self, range: RangeType) -> bool {
        self == Self::transparent(range)
    }
}

/// A handle to a node within one forest: either a live non-terminal node or
/// a terminal value. Handles are only meaningful relative to the forest that
/// produced them; nothing here prevents mixing handles from two forests, the
/// forest-level APIs are responsible for catching that as `ForestMismatch`.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Handle {
    Node(NodeId),
    Terminal(Terminal),
}

impl Eq for Handle {}

impl std::hash::Hash for Handle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_raw().hash(state);
    }
}

impl Handle {
    pub fn to_raw(self) -> RawHandle {
        match self {
            Handle::Node(id) => id.index() as RawHandle,
            Handle::Terminal(t) => t.to_raw(),
        }
    }

    pub fn from_raw(raw: RawHandle, range: RangeType) -> Self {
        if raw >= 0 {
            Handle::Node(NodeId::from_index(raw as u32))
        } else {
            Handle::Terminal(Terminal::from_raw(raw, range))
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Handle::Terminal(_))
    }

    pub fn as_node(self) -> Option<NodeId> {
        match self {
            Handle::Node(id) => Some(id),
            Handle::Terminal(_) => None,
        }
    }

    pub fn transparent(range: RangeType) -> Self {
        Handle::Terminal(Terminal::transparent(range))
    }

    pub fn is_transparent(self, range: RangeType) -> bool {
        match self {
            Handle::Node(_) => false,
            Handle::Terminal(t) => t.is_transparent(range),
        }
    }
}

/// Level of a node in its forest: `0` is the terminal level, levels increase
/// towards the root. Negative levels are used by relation forests (MxD) to
/// denote the primed copy of a variable.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Level(pub i32);

impl Level {
    pub fn unprimed(self) -> Level {
        Level(self.0.abs())
    }

    pub fn is_primed(self) -> bool {
        self.0 < 0
    }
}

/// An edge value attached to a down-pointer in EV+/EV* forests.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum EdgeValue {
    None,
    Int(i32),
    Float(f32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_terminal_round_trip() {
        for b in [false, true] {
            let t = Terminal::Bool(b);
            let raw = t.to_raw();
            assert!(raw < 0);
            assert_eq!(Terminal::from_raw(raw, RangeType::Boolean), t);
        }
    }

    #[test]
    fn int_terminal_round_trip() {
        for v in [-1000, -1, 0, 1, 42, i32::MAX, i32::MIN + 1] {
            let t = Terminal::Int(v);
            let raw = t.to_raw();
            assert!(raw < 0);
            assert_eq!(Terminal::from_raw(raw, RangeType::Integer), t);
        }
    }

    #[test]
    fn float_infinite_is_transparent() {
        let inf = Terminal::Float(None);
        assert!(inf.is_transparent(RangeType::Float));
        assert_eq!(Terminal::from_raw(inf.to_raw(), RangeType::Float), inf);
    }

    #[test]
    fn node_and_terminal_handles_do_not_collide() {
        let node = Handle::Node(NodeId::from_index(7));
        let term = Handle::Terminal(Terminal::Bool(true));
        assert!(node.to_raw() >= 0);
        assert!(term.to_raw() < 0);
    }
}
