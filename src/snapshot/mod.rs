pub mod builder;

pub use builder::{summarize, SnapshotBuilder};
