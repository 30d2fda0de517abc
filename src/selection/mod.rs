pub mod selector;

pub use selector::{OpportunitySelector, ScanFailure, Selection};
