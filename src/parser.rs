//! Object parser.
//!
//! Combines lexer tokens into complete objects (arrays, dictionaries,
//! streams, indirect references). The parser is a cursor over the whole
//! document so every error carries the absolute byte offset where parsing
//! stopped.
//!
//! Parsing is strict: nothing is repaired or skipped. A stream needs a
//! direct `/Length`, `stream` must be followed by LF or CRLF, and the
//! declared length must end right before `endstream`.

use crate::error::{Error, ParseFailure, Result};
use crate::lexer::{self, Token};
use crate::object::{Dictionary, Object, ObjectRef};

/// Decode escape sequences in literal strings.
///
/// Handles `\n \r \t \b \f \( \) \\`, 1-3 digit octal escapes and line
/// continuations. Unknown escapes keep the escaped byte and drop the
/// backslash.
///
/// ```
/// # use docseal::parser::decode_literal_string_escapes;
/// let decoded = decode_literal_string_escapes(b"Section \\247 71.01");
/// assert_eq!(decoded, b"Section \xa7 71.01");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            result.push(raw[i]);
            i += 1;
            continue;
        }

        match raw[i + 1] {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(8),
            b'f' => result.push(12),
            b'\n' => {},
            b'\r' => {
                if raw.get(i + 2) == Some(&b'\n') {
                    i += 1;
                }
            },
            c @ b'0'..=b'7' => {
                let mut octal_value = (c - b'0') as u32;
                let mut len = 1;
                while len < 3 {
                    match raw.get(i + 1 + len) {
                        Some(d @ b'0'..=b'7') => {
                            octal_value = octal_value * 8 + (d - b'0') as u32;
                            len += 1;
                        },
                        _ => break,
                    }
                }
                result.push((octal_value & 0xFF) as u8);
                i += 1 + len;
                continue;
            },
            other => result.push(other),
        }
        i += 2;
    }

    result
}

/// Decode a hex string body to bytes.
///
/// Whitespace is ignored and an odd trailing digit is padded with 0.
///
/// ```
/// use docseal::parser::decode_hex;
///
/// assert_eq!(decode_hex(b"48656C6C6F").unwrap(), b"Hello");
/// assert_eq!(decode_hex(b"4").unwrap(), vec![0x40]);
/// ```
pub fn decode_hex(hex_bytes: &[u8]) -> Option<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .filter(|c| !lexer::is_whitespace(**c))
        .map(|c| (*c as char).to_digit(16).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>()?;

    Some(
        digits
            .chunks(2)
            .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
            .collect(),
    )
}

/// Cursor-based object parser over a complete document buffer.
pub struct ObjectParser<'a> {
    input: &'a [u8],
    pos: usize,
    max_depth: usize,
}

impl<'a> ObjectParser<'a> {
    /// Create a parser positioned at `pos`.
    pub fn new(input: &'a [u8], pos: usize, max_depth: usize) -> Self {
        Self {
            input,
            pos,
            max_depth,
        }
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.input.len());
    }

    /// Input from the cursor on.
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    /// Skip whitespace and comments.
    pub fn skip_ws(&mut self) {
        let rest = lexer::skip_ws(self.remaining());
        self.pos = self.input.len() - rest.len();
    }

    /// Whether only whitespace and comments remain.
    pub fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.input.len()
    }

    fn error(&self, offset: usize, reason: ParseFailure) -> Error {
        Error::parse(offset, reason)
    }

    /// Look at the next token without consuming it.
    ///
    /// Returns the token and the offset where it starts.
    pub fn peek_token(&self) -> Result<(usize, Token<'a>)> {
        let rest = self.remaining();
        let start = self.input.len() - lexer::skip_ws(rest).len();
        match lexer::token(rest) {
            Ok((_, tok)) => Ok((start, tok)),
            Err(_) => Err(self.error(start, lexer::classify_failure(rest))),
        }
    }

    /// Consume the next token.
    pub fn next_token(&mut self) -> Result<(usize, Token<'a>)> {
        let rest = self.remaining();
        let start = self.input.len() - lexer::skip_ws(rest).len();
        match lexer::token(rest) {
            Ok((after, tok)) => {
                self.pos = self.input.len() - after.len();
                Ok((start, tok))
            },
            Err(_) => Err(self.error(start, lexer::classify_failure(rest))),
        }
    }

    /// Consume the next token and require it to equal `expected`.
    ///
    /// A lexing failure or a different token both report `failure`, except
    /// that running out of input reports `truncated`.
    pub fn expect(&mut self, expected: Token<'_>, failure: ParseFailure) -> Result<usize> {
        match self.next_token() {
            Ok((start, tok)) if tok == expected => Ok(start),
            Ok((start, _)) => Err(self.error(start, failure)),
            Err(Error::Parse {
                offset,
                reason: ParseFailure::Truncated,
            }) => Err(self.error(offset, ParseFailure::Truncated)),
            Err(Error::Parse { offset, .. }) => Err(self.error(offset, failure)),
            Err(e) => Err(e),
        }
    }

    /// Consume the next token as a non-negative integer that fits `u32`.
    pub fn next_u32(&mut self) -> Result<u32> {
        match self.next_token()? {
            (start, Token::Integer(i)) => {
                u32::try_from(i).map_err(|_| self.error(start, ParseFailure::InvalidNumber))
            },
            (start, _) => Err(self.error(start, ParseFailure::UnexpectedToken)),
        }
    }

    /// Parse one complete object at the cursor.
    ///
    /// A dictionary directly followed by `stream` becomes a stream object.
    pub fn parse_object(&mut self) -> Result<Object> {
        let obj = self.parse_value(0)?;
        if let Object::Dictionary(dict) = obj {
            if let Ok((_, Token::StreamStart)) = self.peek_token() {
                self.next_token()?;
                let data = self.parse_stream_data(&dict)?;
                return Ok(Object::Stream { dict, data });
            }
            return Ok(Object::Dictionary(dict));
        }
        Ok(obj)
    }

    fn parse_value(&mut self, depth: usize) -> Result<Object> {
        let (start, tok) = self.next_token()?;

        match tok {
            Token::Null => Ok(Object::Null),
            Token::True => Ok(Object::Boolean(true)),
            Token::False => Ok(Object::Boolean(false)),
            Token::Integer(i) => self.integer_or_reference(start, i),
            Token::Real(r) => Ok(Object::Real(r)),
            Token::LiteralString(raw) => Ok(Object::String(decode_literal_string_escapes(raw))),
            Token::HexString(hex) => decode_hex(hex)
                .map(Object::String)
                .ok_or_else(|| self.error(start, ParseFailure::InvalidHexString)),
            Token::Name(name) => Ok(Object::Name(name)),
            Token::ArrayStart => {
                self.enter(start, depth)?;
                self.parse_array(depth + 1)
            },
            Token::DictStart => {
                self.enter(start, depth)?;
                self.parse_dictionary(depth + 1).map(Object::Dictionary)
            },
            _ => Err(self.error(start, ParseFailure::UnexpectedToken)),
        }
    }

    fn enter(&self, start: usize, depth: usize) -> Result<()> {
        if depth + 1 > self.max_depth {
            log::debug!("Nesting depth {} exceeds limit at byte {}", depth + 1, start);
            return Err(self.error(start, ParseFailure::DepthExceeded));
        }
        Ok(())
    }

    /// `id gen R` lookahead after an integer.
    fn integer_or_reference(&mut self, start: usize, value: i64) -> Result<Object> {
        let checkpoint = self.pos;
        if let Ok((_, Token::Integer(gen))) = self.next_token() {
            if let Ok((_, Token::R)) = self.next_token() {
                let id = u32::try_from(value)
                    .map_err(|_| self.error(start, ParseFailure::InvalidNumber))?;
                let gen = u16::try_from(gen)
                    .map_err(|_| self.error(start, ParseFailure::InvalidNumber))?;
                return Ok(Object::Reference(ObjectRef::new(id, gen)));
            }
        }
        self.pos = checkpoint;
        Ok(Object::Integer(value))
    }

    fn parse_array(&mut self, depth: usize) -> Result<Object> {
        let mut objects = Vec::new();
        loop {
            if let (_, Token::ArrayEnd) = self.peek_token()? {
                self.next_token()?;
                return Ok(Object::Array(objects));
            }
            objects.push(self.parse_value(depth)?);
        }
    }

    fn parse_dictionary(&mut self, depth: usize) -> Result<Dictionary> {
        let mut dict = Dictionary::new();
        loop {
            match self.next_token()? {
                (_, Token::DictEnd) => return Ok(dict),
                (_, Token::Name(key)) => {
                    let value = self.parse_value(depth)?;
                    // later duplicates win, first position is kept
                    dict.insert(key, value);
                },
                (start, _) => return Err(self.error(start, ParseFailure::UnexpectedToken)),
            }
        }
    }

    /// Read stream payload; the cursor sits right after `stream`.
    fn parse_stream_data(&mut self, dict: &Dictionary) -> Result<bytes::Bytes> {
        let rest = self.remaining();
        let data_start = if rest.starts_with(b"\r\n") {
            self.pos + 2
        } else if rest.starts_with(b"\n") {
            self.pos + 1
        } else {
            return Err(self.error(self.pos, ParseFailure::UnexpectedToken));
        };

        let length = match dict.get("Length") {
            Some(Object::Integer(n)) if *n >= 0 => *n as usize,
            _ => return Err(self.error(self.pos, ParseFailure::MissingLength)),
        };

        let data_end = data_start
            .checked_add(length)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| self.error(data_start, ParseFailure::LengthExceedsContent))?;

        let data = bytes::Bytes::copy_from_slice(&self.input[data_start..data_end]);
        self.pos = data_end;
        log::trace!("Stream payload of {} bytes at {}", length, data_start);

        match self.next_token() {
            Ok((_, Token::StreamEnd)) => Ok(data),
            Ok((start, _)) | Err(Error::Parse { offset: start, .. }) => {
                Err(self.error(start, ParseFailure::MissingEndstream))
            },
            Err(e) => Err(e),
        }
    }
}

/// Parse a single object from a standalone buffer.
///
/// ```
/// use docseal::parser::parse_object;
///
/// let obj = parse_object(b"<< /Type /Page /Count 3 >>").unwrap();
/// assert_eq!(obj.as_dict().unwrap().get("Count").unwrap().as_integer(), Some(3));
/// ```
pub fn parse_object(input: &[u8]) -> Result<Object> {
    ObjectParser::new(input, 0, crate::parser_config::ParserOptions::default().max_object_depth)
        .parse_object()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_with_depth(input: &[u8], depth: usize) -> Result<Object> {
        ObjectParser::new(input, 0, depth).parse_object()
    }

    fn reason(result: Result<Object>) -> ParseFailure {
        match result {
            Err(Error::Parse { reason, .. }) => reason,
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_primitives() {
        assert_eq!(parse_object(b"null").unwrap(), Object::Null);
        assert_eq!(parse_object(b"true").unwrap(), Object::Boolean(true));
        assert_eq!(parse_object(b"-7").unwrap(), Object::Integer(-7));
        assert_eq!(parse_object(b"/Sig").unwrap(), Object::name("Sig"));
        assert_eq!(parse_object(b"(a\\(b)").unwrap(), Object::String(b"a(b".to_vec()));
        assert_eq!(parse_object(b"<414>").unwrap(), Object::String(vec![0x41, 0x40]));
    }

    #[test]
    fn test_parse_reference_vs_integers() {
        assert_eq!(
            parse_object(b"12 0 R").unwrap(),
            Object::Reference(ObjectRef::new(12, 0))
        );
        let arr = parse_object(b"[1 2 3]").unwrap();
        assert_eq!(
            arr,
            Object::Array(vec![Object::Integer(1), Object::Integer(2), Object::Integer(3)])
        );
        let mixed = parse_object(b"[1 0 R 5]").unwrap();
        assert_eq!(
            mixed,
            Object::Array(vec![Object::Reference(ObjectRef::new(1, 0)), Object::Integer(5)])
        );
    }

    #[test]
    fn test_negative_reference_rejected() {
        assert_eq!(reason(parse_object(b"-1 0 R")), ParseFailure::InvalidNumber);
    }

    #[test]
    fn test_parse_dictionary_keeps_order() {
        let obj = parse_object(b"<< /Z 1 /A 2 /M << /Inner true >> >>").unwrap();
        let dict = obj.as_dict().unwrap();
        let keys: Vec<&str> = dict.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Z", "A", "M"]);
    }

    #[test]
    fn test_dictionary_key_must_be_name() {
        assert_eq!(reason(parse_object(b"<< 1 2 >>")), ParseFailure::UnexpectedToken);
    }

    #[test]
    fn test_unclosed_containers_are_truncated() {
        assert_eq!(reason(parse_object(b"[1 2")), ParseFailure::Truncated);
        assert_eq!(reason(parse_object(b"<< /A 1")), ParseFailure::Truncated);
    }

    #[test]
    fn test_nesting_depth_limit() {
        assert!(parse_with_depth(b"[[[[1]]]]", 4).is_ok());
        assert_eq!(reason(parse_with_depth(b"[[[[[1]]]]]", 4)), ParseFailure::DepthExceeded);
        assert_eq!(
            reason(parse_with_depth(b"<< /A << /B << /C 1 >> >> >>", 2)),
            ParseFailure::DepthExceeded
        );
    }

    #[test]
    fn test_parse_stream() {
        let input = b"<< /Length 5 >>\nstream\nHello\nendstream";
        let obj = parse_object(input).unwrap();
        match obj {
            Object::Stream { dict, data } => {
                assert_eq!(dict.get("Length").unwrap().as_integer(), Some(5));
                assert_eq!(&data[..], b"Hello");
            },
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_with_crlf() {
        let input = b"<< /Length 3 >>stream\r\nabc\r\nendstream";
        let obj = parse_object(input).unwrap();
        assert!(obj.is_stream());
    }

    #[test]
    fn test_stream_requires_direct_length() {
        let input = b"<< /Length 4 0 R >>\nstream\nabc\nendstream";
        assert_eq!(reason(parse_object(input)), ParseFailure::MissingLength);
        let input = b"<< >>\nstream\nabc\nendstream";
        assert_eq!(reason(parse_object(input)), ParseFailure::MissingLength);
    }

    #[test]
    fn test_stream_length_exceeds_content() {
        let input = b"<< /Length 500 >>\nstream\nabc\nendstream";
        assert_eq!(reason(parse_object(input)), ParseFailure::LengthExceedsContent);
    }

    #[test]
    fn test_stream_length_too_short() {
        let input = b"<< /Length 1 >>\nstream\nabc\nendstream";
        assert_eq!(reason(parse_object(input)), ParseFailure::MissingEndstream);
    }

    #[test]
    fn test_stream_keyword_needs_eol() {
        let input = b"<< /Length 3 >>\nstream abc\nendstream";
        assert_eq!(reason(parse_object(input)), ParseFailure::UnexpectedToken);
        let input = b"<< /Length 3 >>\nstream\rabc\nendstream";
        assert_eq!(reason(parse_object(input)), ParseFailure::UnexpectedToken);
    }

    #[test]
    fn test_error_offset_is_absolute() {
        let input = b"   [ 1 2 ) ]";
        match parse_object(input) {
            Err(Error::Parse { offset, .. }) => assert_eq!(offset, 9),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_literal_escapes() {
        assert_eq!(decode_literal_string_escapes(b"a\\nb"), b"a\nb");
        assert_eq!(decode_literal_string_escapes(b"\\101\\60"), b"A0");
        assert_eq!(decode_literal_string_escapes(b"line\\\r\nnext"), b"linenext");
        assert_eq!(decode_literal_string_escapes(b"\\q"), b"q");
    }

    #[test]
    fn test_decode_hex_rejects_garbage() {
        assert!(decode_hex(b"4G").is_none());
        assert_eq!(decode_hex(b"").unwrap(), Vec::<u8>::new());
        assert_eq!(decode_hex(b"41 42\n43").unwrap(), b"ABC");
    }
}
