//! # Memory Management
//!
//! Two storage tiers for component data:
//! - [`ChunkedStore`]: plain-data columns packed into fixed-size chunks
//! - [`ListStore`]: growable arrays for components that own heap data
//!
//! Both tiers share one allocate/release contract: slots are dense, and a
//! release moves the last slot into the freed one.

mod chunk;
mod list;

pub(crate) use chunk::pair_mut;
pub use chunk::{ChunkedStore, ColumnSpec, CHUNK_ALIGN};
pub use list::{ComponentColumn, ListStore};
