pub mod artifacts;
pub mod schema;

pub use artifacts::{IndexStore, Manifest, StaleReport, StoredIndex};
