mod models;
pub mod schema;
mod staging;
mod store;
mod trait_def;

pub use models::*;
pub use staging::{StagingOrigin, StagingStore};
pub(crate) use store::reserve_id;
pub use store::SqliteCatalogStore;
pub use trait_def::{CatalogStore, SweepReport};
