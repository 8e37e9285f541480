//! Feature container I/O.

mod feature_store;


pub use feature_store::{FeatureStore, FeatureTable, DEFAULT_COMPRESSION_LEVEL};
