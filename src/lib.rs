//! A pure-Rust library for reading, writing, and editing ZIM archives.
//!
//! ZIM files are a format used primarily to store wikis (such as Wikipedia and others based on
//! MediaWiki) and other offline content collections for the Kiwix reader.
//!
//! For more info, see the [OpenZIM website](http://www.openzim.org/wiki/OpenZIM).
//!
//! The read path starts at [`archive::Archive::open`]; editing starts at
//! [`writer::Writer::open`] or [`writer::Writer::create`].

pub mod allocator;
pub mod archive;
pub mod cache;
pub mod cluster;
pub mod codec;
pub mod compression;
pub mod entry;
pub mod error;
pub mod header;
pub mod mime;
pub mod namespace;
pub mod pointer_list;
pub mod policy;
pub mod resolver;
pub mod uuid;
pub mod writer;

pub use archive::{Archive, Entry};
pub use codec::{OffsetSource, Source, WritableSource};
pub use error::{Error, Result};
pub use namespace::Namespace;
pub use policy::Policy;
pub use writer::Writer;
