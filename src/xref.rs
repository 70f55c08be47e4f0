//! Cross-reference tables.
//!
//! Only classic `xref` sections are supported. The body scan is the source
//! of truth for where objects live; a table, when present, is checked
//! against it entry by entry and never used to locate objects.

use crate::error::{Error, ParseFailure, Result};
use std::collections::BTreeMap;
use std::io::Write;

/// Cross-reference table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRefEntry {
    /// Byte offset (in use) or next free object number (free)
    pub offset: u64,
    /// Generation number
    pub generation: u16,
    /// Whether the object is in use
    pub in_use: bool,
}

impl XRefEntry {
    /// Create an in-use entry.
    pub fn in_use(offset: u64, generation: u16) -> Self {
        Self {
            offset,
            generation,
            in_use: true,
        }
    }

    /// Create a free entry.
    pub fn free(next_free: u64, generation: u16) -> Self {
        Self {
            offset: next_free,
            generation,
            in_use: false,
        }
    }
}

/// Cross-reference table that maps object numbers to their locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrossRefTable {
    entries: BTreeMap<u32, XRefEntry>,
}

impl CrossRefTable {
    /// Create a new empty cross-reference table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; a later entry for the same number replaces the earlier one.
    pub fn add_entry(&mut self, object_number: u32, entry: XRefEntry) {
        self.entries.insert(object_number, entry);
    }

    /// Get the entry for an object number.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// Entries in ascending object number order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &XRefEntry)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every in-use entry against the offsets found by the body scan.
    ///
    /// `locate` returns the generation and start offset of an object number.
    pub fn validate<F>(&self, table_offset: usize, locate: F) -> Result<()>
    where
        F: Fn(u32) -> Option<(u16, usize)>,
    {
        for (id, entry) in self.iter().filter(|(_, e)| e.in_use) {
            match locate(id) {
                Some((gen, offset)) if gen == entry.generation && offset as u64 == entry.offset => {
                },
                _ => {
                    log::debug!(
                        "xref entry for object {} points at {} but the object is elsewhere",
                        id,
                        entry.offset
                    );
                    return Err(Error::parse(table_offset, ParseFailure::XrefMismatch));
                },
            }
        }
        Ok(())
    }

    /// Write the table as a single subsection starting at object 0.
    ///
    /// Object numbers absent from the table are written as free entries.
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let size = self.entries.keys().next_back().map(|n| n + 1).unwrap_or(1);
        writeln!(out, "xref")?;
        writeln!(out, "0 {}", size)?;
        for id in 0..size {
            match self.entries.get(&id) {
                Some(e) if e.in_use => writeln!(out, "{:010} {:05} n\r", e.offset, e.generation)?,
                Some(e) => writeln!(out, "{:010} {:05} f\r", e.offset, e.generation)?,
                None => writeln!(out, "{:010} {:05} f\r", 0, 65535)?,
            }
        }
        Ok(())
    }
}

fn skip_spaces(input: &[u8], mut pos: usize) -> usize {
    while pos < input.len() && crate::lexer::is_whitespace(input[pos]) {
        pos += 1;
    }
    pos
}

fn read_digits(input: &[u8], pos: usize) -> Option<(u64, usize)> {
    let end = input[pos..]
        .iter()
        .position(|c| !c.is_ascii_digit())
        .map(|n| pos + n)
        .unwrap_or(input.len());
    if end == pos || end - pos > 10 {
        return None;
    }
    let text = std::str::from_utf8(&input[pos..end]).ok()?;
    text.parse().ok().map(|v| (v, end))
}

/// Parse the body of an `xref` section.
///
/// `pos` points right after the `xref` keyword. Parsing stops before the
/// `trailer` keyword; the returned offset is where it stopped.
/// `max_entries` bounds the total number of entries.
pub fn parse_xref_section(
    input: &[u8],
    mut pos: usize,
    max_entries: usize,
) -> Result<(CrossRefTable, usize)> {
    let mut table = CrossRefTable::new();
    let malformed = |at: usize| {
        if at >= input.len() {
            Error::parse(at, ParseFailure::Truncated)
        } else {
            Error::parse(at, ParseFailure::UnexpectedToken)
        }
    };

    loop {
        pos = skip_spaces(input, pos);
        if pos >= input.len() {
            return Err(Error::parse(pos, ParseFailure::Truncated));
        }
        if !input[pos].is_ascii_digit() {
            // trailer or whatever follows is the caller's business
            return Ok((table, pos));
        }

        let (start, next) = read_digits(input, pos).ok_or_else(|| malformed(pos))?;
        let next = skip_spaces(input, next);
        let (count, next) = read_digits(input, next).ok_or_else(|| malformed(next))?;
        pos = next;

        if table.len() as u64 + count > max_entries as u64 {
            return Err(Error::parse(pos, ParseFailure::TooManyObjects));
        }

        for i in 0..count {
            pos = skip_spaces(input, pos);
            let (offset, p) = read_digits(input, pos).ok_or_else(|| malformed(pos))?;
            let p = skip_spaces(input, p);
            let (generation, p) = read_digits(input, p).ok_or_else(|| malformed(p))?;
            let p = skip_spaces(input, p);
            let generation = u16::try_from(generation)
                .map_err(|_| Error::parse(p, ParseFailure::InvalidNumber))?;
            let entry = match input.get(p) {
                Some(b'n') => XRefEntry::in_use(offset, generation),
                Some(b'f') => XRefEntry::free(offset, generation),
                Some(_) => return Err(malformed(p)),
                None => return Err(Error::parse(p, ParseFailure::Truncated)),
            };
            let number = u32::try_from(start + i)
                .map_err(|_| Error::parse(p, ParseFailure::InvalidNumber))?;
            table.add_entry(number, entry);
            pos = p + 1;
        }
    }
}
