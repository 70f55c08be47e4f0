//! Integration tests for document parsing and serialization.

use bytes::Bytes;
use docseal::document::Document;
use docseal::error::{Error, ParseFailure};
use docseal::object::{Object, ObjectRef};
use docseal::parser_config::ParserOptions;
use proptest::prelude::*;

const SIMPLE: &[u8] = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>\nendobj\n\
4 0 obj\n<< /Length 21 >>\nstream\nBT /F1 12 Tf (Hi) Tj\n\nendstream\nendobj\n\
trailer\n<< /Root 1 0 R /Size 5 >>\n%%EOF\n";

fn parse_with(input: &[u8], options: &ParserOptions) -> docseal::Result<Document> {
    Document::parse(Bytes::copy_from_slice(input), options)
}

fn parse(input: &[u8]) -> docseal::Result<Document> {
    parse_with(input, &ParserOptions::default())
}

fn reason(result: docseal::Result<Document>) -> ParseFailure {
    match result {
        Err(Error::Parse { reason, .. }) => reason,
        Err(other) => panic!("expected parse error, got {}", other),
        Ok(doc) => panic!("expected parse error, got {} objects", doc.object_count()),
    }
}

#[test]
fn test_parse_simple_document() {
    let doc = parse(SIMPLE).unwrap();
    assert_eq!(doc.version(), "1.4");
    assert_eq!(doc.object_count(), 4);
    assert_eq!(doc.root(), Some(ObjectRef::new(1, 0)));

    let page = doc.get(3).and_then(Object::as_dict).unwrap();
    assert_eq!(page["Type"].as_name(), Some("Page"));
    let contents = doc.resolve(&page["Contents"]).unwrap();
    let Object::Stream { data, .. } = contents else {
        panic!("content stream expected");
    };
    assert_eq!(&data[..], b"BT /F1 12 Tf (Hi) Tj\n");
}

#[test]
fn test_size_limit_boundary() {
    let exact = ParserOptions::default().with_max_size_bytes(SIMPLE.len());
    assert!(parse_with(SIMPLE, &exact).is_ok());

    let one_under = ParserOptions::default().with_max_size_bytes(SIMPLE.len() - 1);
    match parse_with(SIMPLE, &one_under) {
        Err(Error::DocumentTooLarge { size, limit }) => {
            assert_eq!(size, SIMPLE.len());
            assert_eq!(limit, SIMPLE.len() - 1);
        },
        other => panic!("expected size rejection, got {:?}", other.map(|d| d.object_count())),
    }
}

#[test]
fn test_oversized_garbage_rejected_before_tokenizing() {
    // would be invalid_header if the parser looked at it
    let garbage = vec![0xFFu8; 64];
    let options = ParserOptions::default().with_max_size_bytes(63);
    assert!(matches!(
        parse_with(&garbage, &options),
        Err(Error::DocumentTooLarge { .. })
    ));
}

#[test]
fn test_kids_cycle_is_rejected() {
    let input = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Pages /Kids [2 0 R] /Count 1 >>\nendobj\n\
trailer\n<< /Root 1 0 R >>\n";
    assert_eq!(reason(parse(input)), ParseFailure::CyclicReference);
}

#[test]
fn test_back_links_are_not_cycles() {
    let input = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R /Outlines 4 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n\
4 0 obj\n<< /First 5 0 R >>\nendobj\n\
5 0 obj\n<< /Parent 4 0 R /P 3 0 R /Next 6 0 R >>\nendobj\n\
6 0 obj\n<< /Parent 4 0 R /Prev 5 0 R >>\nendobj\n\
trailer\n<< /Root 1 0 R >>\n";
    assert!(parse(input).is_ok());
}

#[test]
fn test_declared_length_beyond_content() {
    let input = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog >>\nendobj\n\
2 0 obj\n<< /Length 4096 >>\nstream\nshort\nendstream\nendobj\n\
trailer\n<< /Root 1 0 R >>\n";
    assert_eq!(reason(parse(input)), ParseFailure::LengthExceedsContent);
}

#[test]
fn test_indirect_length_is_rejected() {
    let input = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog >>\nendobj\n\
2 0 obj\n<< /Length 3 0 R >>\nstream\nabc\nendstream\nendobj\n\
3 0 obj\n3\nendobj\n\
trailer\n<< /Root 1 0 R >>\n";
    assert_eq!(reason(parse(input)), ParseFailure::MissingLength);
}

#[test]
fn test_truncated_document() {
    let cut = &SIMPLE[..SIMPLE.len() / 2];
    assert!(matches!(parse(cut), Err(Error::Parse { .. })));
}

#[test]
fn test_nesting_depth_limit() {
    let mut input = b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog /Deep ".to_vec();
    input.extend(std::iter::repeat(b'[').take(40));
    input.extend(std::iter::repeat(b']').take(40));
    input.extend_from_slice(b" >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n");

    assert!(parse(&input).is_ok());
    let shallow = ParserOptions::default().with_max_object_depth(16);
    assert_eq!(reason(parse_with(&input, &shallow)), ParseFailure::DepthExceeded);
}

#[test]
fn test_active_content_is_only_reported() {
    let input = b"%PDF-1.7\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R /OpenAction 3 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n\
3 0 obj\n<< /S /Launch /F (calc.exe) >>\nendobj\n\
trailer\n<< /Root 1 0 R >>\n";
    let doc = parse(input).unwrap();
    assert!(doc.has_active_content());
    assert!(!parse(SIMPLE).unwrap().has_active_content());
}

#[test]
fn test_serialization_is_stable() {
    let first = parse(SIMPLE).unwrap().to_bytes().unwrap();
    let second = parse(&first).unwrap().to_bytes().unwrap();
    assert_eq!(first, second);
    assert!(first.starts_with(b"%PDF-1.4\n"));
    assert!(first.ends_with(b"%%EOF\n"));
}

#[test]
fn test_written_xref_is_checked_on_reparse() {
    let written = parse(SIMPLE).unwrap().to_bytes().unwrap();
    let at = written.windows(8).position(|w| w == b"\n2 0 obj").unwrap() + 1;
    let mut shifted = written.clone();
    shifted.insert(at, b'\n');
    assert_eq!(reason(parse(&shifted)), ParseFailure::XrefMismatch);
}

proptest! {
    #[test]
    fn prop_arbitrary_bytes_never_panic(tail in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut input = b"%PDF-1.7\n".to_vec();
        input.extend_from_slice(&tail);
        let _ = parse(&input);
    }

    #[test]
    fn prop_single_byte_mutation_never_panics(index in 0..SIMPLE.len(), byte in any::<u8>()) {
        let mut input = SIMPLE.to_vec();
        input[index] = byte;
        if let Ok(doc) = parse(&input) {
            prop_assert!(doc.to_bytes().is_ok());
        }
    }
}
