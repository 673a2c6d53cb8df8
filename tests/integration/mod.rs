//! Integration tests for the fstate store

mod normalisation;
mod process_builder;
mod store_integrity;
pub mod test_utils;
