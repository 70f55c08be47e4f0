//! Document writer.
//!
//! Assembles a complete file from a [`Document`]:
//! - Header with version and binary marker
//! - Indirect objects in ascending object number order
//! - Classic cross-reference table
//! - Trailer with an up-to-date `/Size`, then `startxref` and `%%EOF`

use crate::document::Document;
use crate::error::Result;
use crate::object::Object;
use crate::xref::{CrossRefTable, XRefEntry};
use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Range;

use super::ObjectSerializer;

/// Serialized document plus the byte span of every indirect object.
#[derive(Debug, Clone)]
pub struct WrittenDocument {
    /// Complete file bytes
    pub bytes: Vec<u8>,
    /// Span from the object header through `endobj`, keyed by object number
    pub spans: BTreeMap<u32, Range<usize>>,
}

/// Writer that turns a [`Document`] into bytes.
#[derive(Debug, Clone, Default)]
pub struct DocumentWriter {
    serializer: ObjectSerializer,
}

impl DocumentWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize the full document.
    pub fn write(&self, doc: &Document) -> Result<WrittenDocument> {
        let mut output = Vec::new();
        let mut spans = BTreeMap::new();
        let mut xref = CrossRefTable::new();
        xref.add_entry(0, XRefEntry::free(0, 65535));

        writeln!(output, "%PDF-{}", doc.version())?;
        output.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

        for (id, gen, obj) in doc.objects() {
            let start = output.len();
            self.serializer.write_indirect(&mut output, id, gen, obj)?;
            xref.add_entry(id, XRefEntry::in_use(start as u64, gen));
            spans.insert(id, start..output.len());
        }

        let xref_start = output.len();
        xref.write_to(&mut output)?;

        let size = doc.objects().map(|(id, _, _)| id).max().map(|id| id + 1).unwrap_or(1);
        let mut trailer = doc.trailer().clone();
        trailer.insert("Size".to_string(), Object::Integer(size as i64));
        // a full rewrite has no previous section
        trailer.shift_remove("Prev");
        trailer.shift_remove("XRefStm");

        writeln!(output, "trailer")?;
        self.serializer
            .write_object(&mut output, &Object::Dictionary(trailer))?;
        writeln!(output)?;
        writeln!(output, "startxref")?;
        writeln!(output, "{}", xref_start)?;
        writeln!(output, "%%EOF")?;

        log::trace!("Wrote {} objects, {} bytes", spans.len(), output.len());
        Ok(WrittenDocument {
            bytes: output,
            spans,
        })
    }
}
