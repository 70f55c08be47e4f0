//! Parsed documents.
//!
//! [`Document::parse`] turns untrusted bytes into an object graph. The parse
//! is strict and non-recovering: any structural problem is a
//! [`Error::Parse`] with the offset where it was found. Nothing in the
//! document is ever interpreted or executed; active content is only
//! detected and reported.

use crate::budget::Budget;
use crate::error::{Error, ParseFailure, Result};
use crate::lexer::Token;
use crate::object::{Dictionary, Object, ObjectRef};
use crate::parser::ObjectParser;
use crate::parser_config::ParserOptions;
use crate::writer::{DocumentWriter, WrittenDocument};
use crate::xref::{self, CrossRefTable};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

/// Keys whose references point back up the structure and are not graph edges.
const BACK_LINK_KEYS: &[&str] = &["Parent", "Prev", "P"];

/// Dictionary keys that mark scriptable or launching content.
const ACTIVE_KEYS: &[&str] = &["JS", "JavaScript", "OpenAction"];

/// Name values that mark scriptable or launching actions.
const ACTIVE_ACTIONS: &[&str] = &["JavaScript", "Launch"];

#[derive(Debug, Clone, PartialEq)]
struct IndirectObject {
    gen: u16,
    object: Object,
}

/// A parsed document.
///
/// Holds the exact source bytes, the header version, every indirect object
/// keyed by object number and the trailer dictionary.
#[derive(Debug, Clone)]
pub struct Document {
    source: Bytes,
    version: String,
    objects: BTreeMap<u32, IndirectObject>,
    spans: BTreeMap<u32, Range<usize>>,
    trailer: Dictionary,
    active_content: bool,
}

impl Document {
    /// Parse a document with no time budget.
    pub fn parse(bytes: Bytes, options: &ParserOptions) -> Result<Self> {
        Self::parse_with_budget(bytes, options, &Budget::unlimited())
    }

    /// Parse a document, checking `budget` between objects.
    ///
    /// The size ceiling is enforced before any byte is tokenized.
    pub fn parse_with_budget(bytes: Bytes, options: &ParserOptions, budget: &Budget) -> Result<Self> {
        if bytes.len() > options.max_size_bytes {
            return Err(Error::DocumentTooLarge {
                size: bytes.len(),
                limit: options.max_size_bytes,
            });
        }

        let (version, body_start) = parse_header(&bytes)?;
        let mut parser = ObjectParser::new(&bytes, body_start, options.max_object_depth);

        let mut objects: BTreeMap<u32, IndirectObject> = BTreeMap::new();
        let mut spans = BTreeMap::new();
        let mut trailer: Option<Dictionary> = None;
        let mut xref_table: Option<(usize, CrossRefTable)> = None;
        let mut startxref: Option<(usize, u32)> = None;

        while !parser.at_end() {
            budget.check()?;
            let (start, tok) = parser.peek_token()?;
            match tok {
                Token::Integer(_) => {
                    let id = parser.next_u32()?;
                    let gen = match parser.next_token()? {
                        (at, Token::Integer(g)) => u16::try_from(g)
                            .map_err(|_| Error::parse(at, ParseFailure::InvalidNumber))?,
                        (at, _) => return Err(Error::parse(at, ParseFailure::UnexpectedToken)),
                    };
                    parser.expect(Token::ObjStart, ParseFailure::UnexpectedToken)?;
                    let object = parser.parse_object()?;
                    parser.expect(Token::ObjEnd, ParseFailure::MissingEndobj)?;

                    if objects.contains_key(&id) {
                        return Err(Error::parse(start, ParseFailure::DuplicateObject));
                    }
                    if objects.len() >= options.max_objects {
                        return Err(Error::parse(start, ParseFailure::TooManyObjects));
                    }
                    log::trace!("Object {} {} at byte {}", id, gen, start);
                    objects.insert(id, IndirectObject { gen, object });
                    spans.insert(id, start..parser.position());
                },
                Token::Xref => {
                    parser.next_token()?;
                    let (table, stop) =
                        xref::parse_xref_section(&bytes, parser.position(), options.max_objects + 1)?;
                    parser.seek(stop);
                    xref_table = Some((start, table));
                },
                Token::Trailer => {
                    parser.next_token()?;
                    match parser.parse_object()? {
                        Object::Dictionary(dict) => trailer = Some(dict),
                        _ => return Err(Error::parse(start, ParseFailure::UnexpectedToken)),
                    }
                },
                Token::StartXref => {
                    parser.next_token()?;
                    let offset = parser.next_u32()?;
                    startxref = Some((start, offset));
                },
                _ => return Err(Error::parse(start, ParseFailure::UnexpectedToken)),
            }
        }

        let end = bytes.len();
        let trailer = trailer.ok_or_else(|| Error::parse(end, ParseFailure::MissingTrailer))?;
        let root = trailer
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::parse(end, ParseFailure::MissingRoot))?;
        if !objects.contains_key(&root.id) {
            return Err(Error::parse(end, ParseFailure::DanglingReference));
        }

        if let Some((table_offset, table)) = &xref_table {
            table.validate(*table_offset, |id| {
                let obj = objects.get(&id)?;
                spans.get(&id).map(|span| (obj.gen, span.start))
            })?;
            if let Some((at, offset)) = startxref {
                if offset as usize != *table_offset {
                    return Err(Error::parse(at, ParseFailure::XrefMismatch));
                }
            }
        }

        check_references(&objects, &spans, &trailer)?;
        budget.check()?;
        check_graph(&objects, &spans, options.max_object_depth)?;

        let active_content = objects.values().any(|o| contains_active_content(&o.object));
        if active_content {
            log::debug!("Document contains active content; it will not be interpreted");
        }
        log::debug!("Parsed document version {} with {} objects", version, objects.len());

        Ok(Self {
            source: bytes,
            version,
            objects,
            spans,
            trailer,
            active_content,
        })
    }

    /// The bytes this document was parsed from.
    pub fn source(&self) -> &Bytes {
        &self.source
    }

    /// Header version, e.g. `1.7`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Trailer dictionary.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Mutable trailer dictionary.
    pub fn trailer_mut(&mut self) -> &mut Dictionary {
        &mut self.trailer
    }

    /// Catalog reference from the trailer.
    pub fn root(&self) -> Option<ObjectRef> {
        self.trailer.get("Root").and_then(Object::as_reference)
    }

    /// Get an indirect object by number.
    pub fn get(&self, id: u32) -> Option<&Object> {
        self.objects.get(&id).map(|o| &o.object)
    }

    /// Get a mutable indirect object by number.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Object> {
        self.objects.get_mut(&id).map(|o| &mut o.object)
    }

    /// Follow one level of indirection.
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> Option<&'a Object> {
        match obj {
            Object::Reference(r) => self.get(r.id),
            other => Some(other),
        }
    }

    /// Add a new indirect object under the next free number.
    pub fn add_object(&mut self, object: Object) -> ObjectRef {
        let id = self.next_object_id();
        self.objects.insert(id, IndirectObject { gen: 0, object });
        ObjectRef::new(id, 0)
    }

    /// Replace an existing object, keeping its generation.
    pub fn replace_object(&mut self, id: u32, object: Object) -> Option<Object> {
        self.objects
            .get_mut(&id)
            .map(|slot| std::mem::replace(&mut slot.object, object))
    }

    /// Next unused object number.
    pub fn next_object_id(&self) -> u32 {
        self.objects.keys().next_back().map(|id| id + 1).unwrap_or(1)
    }

    /// Indirect objects as `(id, gen, object)` in ascending id order.
    pub fn objects(&self) -> impl Iterator<Item = (u32, u16, &Object)> + '_ {
        self.objects.iter().map(|(id, o)| (*id, o.gen, &o.object))
    }

    /// Mutable iteration over indirect objects.
    pub fn objects_mut(&mut self) -> impl Iterator<Item = (u32, u16, &mut Object)> + '_ {
        self.objects.iter_mut().map(|(id, o)| (*id, o.gen, &mut o.object))
    }

    /// Number of indirect objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Byte span of an object in the source, from header through `endobj`.
    pub fn span(&self, id: u32) -> Option<Range<usize>> {
        self.spans.get(&id).cloned()
    }

    /// Whether scripts, launch actions or open actions are present.
    pub fn has_active_content(&self) -> bool {
        self.active_content
    }

    /// Serialize the document.
    pub fn write(&self) -> Result<WrittenDocument> {
        DocumentWriter::new().write(self)
    }

    /// Serialize the document to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.write()?.bytes)
    }
}

/// Returns the version string and the offset where the body starts.
fn parse_header(input: &[u8]) -> Result<(String, usize)> {
    let invalid = || Error::parse(0, ParseFailure::InvalidHeader);
    let rest = input.strip_prefix(b"%PDF-").ok_or_else(invalid)?;

    let major = rest.iter().take_while(|c| c.is_ascii_digit()).count();
    if major == 0 || rest.get(major) != Some(&b'.') {
        return Err(invalid());
    }
    let minor = rest[major + 1..]
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if minor == 0 {
        return Err(invalid());
    }

    let len = major + 1 + minor;
    let version = String::from_utf8_lossy(&rest[..len]).into_owned();
    Ok((version, 5 + len))
}

fn check_references(
    objects: &BTreeMap<u32, IndirectObject>,
    spans: &BTreeMap<u32, Range<usize>>,
    trailer: &Dictionary,
) -> Result<()> {
    let mut dangling: Option<(u32, ObjectRef)> = None;
    for (id, obj) in objects {
        obj.object.for_each_reference(&mut |_, r| {
            if dangling.is_none() && !objects.get(&r.id).is_some_and(|o| o.gen == r.gen) {
                dangling = Some((*id, r));
            }
        });
        if let Some((owner, r)) = dangling {
            log::debug!("Object {} references missing object {}", owner, r);
            let at = spans.get(&owner).map(|s| s.start).unwrap_or(0);
            return Err(Error::parse(at, ParseFailure::DanglingReference));
        }
    }

    for value in trailer.values() {
        let mut missing = false;
        value.for_each_reference(&mut |_, r| {
            missing |= !objects.get(&r.id).is_some_and(|o| o.gen == r.gen);
        });
        if missing {
            return Err(Error::parse(0, ParseFailure::DanglingReference));
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Mark {
    Visiting,
    Done(usize),
}

/// Reject reference cycles and reference chains longer than `max_depth`.
fn check_graph(
    objects: &BTreeMap<u32, IndirectObject>,
    spans: &BTreeMap<u32, Range<usize>>,
    max_depth: usize,
) -> Result<()> {
    let mut marks: HashMap<u32, Mark> = HashMap::with_capacity(objects.len());
    for id in objects.keys() {
        visit(*id, 1, objects, spans, max_depth, &mut marks)?;
    }
    Ok(())
}

fn visit(
    id: u32,
    depth: usize,
    objects: &BTreeMap<u32, IndirectObject>,
    spans: &BTreeMap<u32, Range<usize>>,
    max_depth: usize,
    marks: &mut HashMap<u32, Mark>,
) -> Result<usize> {
    let at = || spans.get(&id).map(|s| s.start).unwrap_or(0);
    match marks.get(&id) {
        Some(Mark::Visiting) => {
            log::debug!("Reference cycle through object {}", id);
            return Err(Error::parse(at(), ParseFailure::CyclicReference));
        },
        Some(Mark::Done(height)) => return Ok(*height),
        None => {},
    }
    if depth > max_depth {
        return Err(Error::parse(at(), ParseFailure::DepthExceeded));
    }

    let Some(obj) = objects.get(&id) else {
        return Ok(0);
    };
    marks.insert(id, Mark::Visiting);

    let mut children = Vec::new();
    obj.object.for_each_reference(&mut |key, r| {
        if !key.is_some_and(|k| BACK_LINK_KEYS.contains(&k)) {
            children.push(r.id);
        }
    });

    let mut height = 1;
    for child in children {
        let child_height = visit(child, depth + 1, objects, spans, max_depth, marks)?;
        height = height.max(child_height + 1);
    }
    if height > max_depth {
        return Err(Error::parse(at(), ParseFailure::DepthExceeded));
    }

    marks.insert(id, Mark::Done(height));
    Ok(height)
}

fn contains_active_content(obj: &Object) -> bool {
    match obj {
        Object::Name(n) => ACTIVE_ACTIONS.contains(&n.as_str()),
        Object::Array(items) => items.iter().any(contains_active_content),
        Object::Dictionary(dict) | Object::Stream { dict, .. } => dict
            .iter()
            .any(|(k, v)| ACTIVE_KEYS.contains(&k.as_str()) || contains_active_content(v)),
        _ => false,
    }
}
