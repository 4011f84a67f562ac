//! Persistent storage of originals and derived variants.

pub mod lmdb_store;
pub mod record;

pub use lmdb_store::{DEFAULT_MAP_SIZE_MB, ImageStore, StoreSettings};
