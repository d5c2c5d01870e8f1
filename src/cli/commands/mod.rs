pub mod graph;
pub mod migrate;
