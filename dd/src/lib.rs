//! Multi-terminal / edge-valued decision diagram engine.
//!
//! Three layers, innermost first:
//! - [`holes`] — chunk allocation inside a forest's flat backing array.
//! - [`storage`] — packing a node's level/children into that array.
//! - [`forest`] — the unique table, op cache, garbage collector and the
//!   reference-counted [`forest::DdEdge`] handle callers hold on to.

pub mod error;
pub mod handle;
pub mod holes;
pub mod storage;
pub mod forest;
pub mod bdd;

pub use error::{DdError, DdResult};
pub use handle::{EdgeValue, Handle, Level, NodeId, RangeType, RawHandle, Terminal};
pub use forest::{DdEdge, Forest, ForestHandle, GcPolicy, OpKey, Reduction, Stats};
pub use holes::{ArrayOfLists, Grid, HeapPerSize, HoleManager, NoneTracked};
pub use storage::{ClassicStorage, CompactStorage, Downs, NodeStorage, UnpackedNode};
