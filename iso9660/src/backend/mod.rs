//! Concrete [`BlockFetcher`](crate::source::BlockFetcher) implementations.

pub mod file;

#[cfg(feature = "http-backend")]
pub mod http;
