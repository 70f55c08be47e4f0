//! Document serialization.
//!
//! ```text
//! Document
//!     ↓
//! [DocumentWriter] (header, objects, xref, trailer)
//!     ↓
//! [ObjectSerializer] (single objects)
//!     ↓
//! bytes
//! ```
//!
//! Output is deterministic: the same [`Document`](crate::document::Document)
//! always serializes to the same bytes.

mod object_serializer;
mod pdf_writer;

pub use object_serializer::ObjectSerializer;
pub use pdf_writer::{DocumentWriter, WrittenDocument};
