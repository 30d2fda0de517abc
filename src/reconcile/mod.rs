pub mod reconciler;

pub use reconciler::{position_from_fills, reconcile, Reconciliation, Reconciler};
