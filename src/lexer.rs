//! Document lexer (tokenizer).
//!
//! Low-level tokenization of the PDF-like object syntax: numbers, literal
//! and hex strings, names, keywords and delimiters. The lexer works on
//! borrowed slices; the caller computes byte offsets from the remaining
//! input length.
//!
//! Whitespace (space, \t, \r, \n, \0, \f) and comments (% to EOL) are skipped.

use crate::error::ParseFailure;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, value},
    sequence::{delimited, preceded},
    IResult,
};

/// Token types recognized by the lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g., 42, -123)
    Integer(i64),

    /// Real (floating-point) number (e.g., 3.14, -2.5, .5)
    Real(f64),

    /// Literal string bytes, escapes not yet decoded
    LiteralString(&'a [u8]),

    /// Hexadecimal string digits, whitespace preserved
    HexString(&'a [u8]),

    /// Name with `#xx` escapes decoded (e.g., "Type" from "/Type")
    Name(String),

    /// Boolean true keyword
    True,

    /// Boolean false keyword
    False,

    /// Null keyword
    Null,

    /// Array start delimiter [
    ArrayStart,

    /// Array end delimiter ]
    ArrayEnd,

    /// Dictionary start delimiter <<
    DictStart,

    /// Dictionary end delimiter >>
    DictEnd,

    /// Indirect object start keyword "obj"
    ObjStart,

    /// Indirect object end keyword "endobj"
    ObjEnd,

    /// Stream start keyword "stream"
    StreamStart,

    /// Stream end keyword "endstream"
    StreamEnd,

    /// Reference keyword "R" (used in "10 0 R")
    R,

    /// Cross-reference section keyword "xref"
    Xref,

    /// Trailer keyword "trailer"
    Trailer,

    /// "startxref" keyword
    StartXref,
}

/// Whitespace characters.
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// Delimiter characters.
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}')
}

fn whitespace(input: &[u8]) -> IResult<&[u8], ()> {
    let (remaining, ws) = take_while(is_whitespace)(input)?;

    if ws.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Space)));
    }

    Ok((remaining, ()))
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip all whitespace and comments, returning the remaining input.
pub fn skip_ws(input: &[u8]) -> &[u8] {
    let mut remaining = input;

    loop {
        if let Ok((rest, _)) = whitespace(remaining) {
            remaining = rest;
            continue;
        }

        if let Ok((rest, _)) = comment(remaining) {
            remaining = rest;
            continue;
        }

        break;
    }

    remaining
}

fn digit_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
}

/// Parse an integer or real number.
///
/// Accepts a leading sign and reals that start or end with a decimal point.
/// Integers that overflow `i64` are rejected.
fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, sign) = opt(one_of("+-"))(input)?;
    let (input, int_part) = opt(digit1)(input)?;
    let (input, frac_part) = opt(preceded(char('.'), opt(digit1)))(input)?;

    if int_part.is_none() && frac_part.is_none() {
        return Err(digit_error(input));
    }

    let mut num_str = String::new();
    if sign == Some('-') {
        num_str.push('-');
    }
    match int_part {
        Some(int) => num_str.push_str(std::str::from_utf8(int).map_err(|_| digit_error(input))?),
        None => num_str.push('0'),
    }

    if let Some(frac) = frac_part {
        num_str.push('.');
        match frac {
            Some(digits) => {
                num_str.push_str(std::str::from_utf8(digits).map_err(|_| digit_error(input))?)
            },
            None => num_str.push('0'),
        }
        let num: f64 = num_str.parse().map_err(|_| digit_error(input))?;
        Ok((input, Token::Real(num)))
    } else {
        let num: i64 = num_str.parse().map_err(|_| digit_error(input))?;
        Ok((input, Token::Integer(num)))
    }
}

/// Parse a literal string enclosed in parentheses.
///
/// Balanced nested parentheses are allowed; escapes are skipped over but
/// returned raw. Decoding happens at the parser level.
fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (remaining, _) = char('(')(input)?;
    let mut depth = 1;
    let mut pos = 0;

    while depth > 0 && pos < remaining.len() {
        match remaining[pos] {
            b'\\' => {
                // the escaped byte never changes depth
                pos += 2;
            },
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                pos += 1;
            },
            _ => {
                pos += 1;
            },
        }
    }

    if depth != 0 || pos > remaining.len() {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof)));
    }

    let content = &remaining[..pos - 1];
    Ok((&remaining[pos..], Token::LiteralString(content)))
}

/// Parse a hexadecimal string enclosed in angle brackets.
fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }

    delimited(
        char('<'),
        map(
            take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)),
            Token::HexString,
        ),
        char('>'),
    )(input)
}

/// Decode `#xx` escape sequences in names.
///
/// Invalid sequences are kept literally.
///
/// ```
/// # use docseal::lexer::decode_name_escapes;
/// assert_eq!(decode_name_escapes(b"A#20B#23C"), "A B#C");
/// assert_eq!(decode_name_escapes(b"Type"), "Type");
/// assert_eq!(decode_name_escapes(b"A#"), "A#");
/// ```
pub fn decode_name_escapes(raw: &[u8]) -> String {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] == b'#' {
            if let (Some(h), Some(l)) = (
                raw.get(i + 1).and_then(|c| (*c as char).to_digit(16)),
                raw.get(i + 2).and_then(|c| (*c as char).to_digit(16)),
            ) {
                result.push((h * 16 + l) as u8);
                i += 3;
                continue;
            }
        }
        result.push(raw[i]);
        i += 1;
    }

    String::from_utf8_lossy(&result).into_owned()
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)), |bytes| {
            Token::Name(decode_name_escapes(bytes))
        }),
    )(input)
}

/// Parse keywords and delimiters.
///
/// Alphabetic keywords must be followed by whitespace, a delimiter or the
/// end of input, so `nullx` or `Rx` never lex as keywords.
fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, tok) = alt((
        value(Token::False, tag(b"false")),
        value(Token::True, tag(b"true")),
        value(Token::Null, tag(b"null")),
        value(Token::ObjStart, tag(b"obj")),
        value(Token::ObjEnd, tag(b"endobj")),
        value(Token::StreamEnd, tag(b"endstream")),
        value(Token::StreamStart, tag(b"stream")),
        value(Token::StartXref, tag(b"startxref")),
        value(Token::Xref, tag(b"xref")),
        value(Token::Trailer, tag(b"trailer")),
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
        value(Token::R, tag(b"R")),
    ))(input)?;

    let alphabetic = !matches!(
        tok,
        Token::DictStart | Token::DictEnd | Token::ArrayStart | Token::ArrayEnd
    );
    if alphabetic {
        if let Some(&next) = rest.first() {
            if !is_whitespace(next) && !is_delimiter(next) {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Tag,
                )));
            }
        }
    }

    Ok((rest, tok))
}

/// Parse a single token after skipping whitespace and comments.
///
/// Order matters: keywords before names, names before numbers, literal
/// strings before hex strings.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);

    alt((parse_keyword, parse_name, parse_number, parse_literal_string, parse_hex_string))(input)
}

/// Classify why `token` failed on this input.
pub fn classify_failure(input: &[u8]) -> ParseFailure {
    let input = skip_ws(input);
    match input.first() {
        None => ParseFailure::Truncated,
        Some(b'(') => ParseFailure::Truncated,
        Some(b'<') => {
            if input.iter().skip(1).any(|&c| c == b'>') {
                ParseFailure::InvalidHexString
            } else {
                ParseFailure::Truncated
            }
        },
        Some(c) if c.is_ascii_digit() || matches!(c, b'+' | b'-' | b'.') => {
            ParseFailure::InvalidNumber
        },
        _ => ParseFailure::UnexpectedToken,
    }
}
