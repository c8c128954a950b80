//! Reading ISO 9660 optical-disc file systems, with System Use Sharing Protocol (SUSP) and
//! Rock Ridge (RRIP) extensions.
//!
//! The entry point is [`Iso`], constructed over any [`BlockFetcher`](source::BlockFetcher)
//! implementation; [`backend::file::FileBackend`] and, behind the `http-backend` feature,
//! [`backend::http::HttpBackend`] are provided.


pub mod backend;
pub mod error;
pub mod iso;
pub mod path_table;
pub mod record;
pub mod rockridge;
pub mod source;
pub mod susp;
pub mod volume_descriptor;

pub use error::{NotFoundError, SourceError};
pub use iso::Iso;
pub use record::Record;
pub use source::{BlockFetcher, Source};
