//! Warehouse-facing load stage: partition replacement and the post-load
//! duplicate-key check.

pub mod replacer;
pub mod report;

pub use replacer::PartitionReplacer;
pub use report::LoadReconciler;
