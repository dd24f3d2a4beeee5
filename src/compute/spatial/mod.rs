pub mod rtree;
pub use rtree::{IndexEntry, IndexStats, RTree};
