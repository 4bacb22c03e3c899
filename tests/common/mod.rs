//! Shared helpers for integration tests

pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{asvs, cwe, nist, CatalogFixture};
