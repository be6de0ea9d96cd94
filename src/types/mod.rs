pub mod cluster;
pub mod task;

// Re-export cluster types
pub use cluster::*;
// Re-export task types
pub use task::*;
