//! ByteRange calculation for signatures.
//!
//! A signature covers the whole file except its own value. The
//! `/ByteRange` array describes the two covered parts:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the `/Contents` hex string begins (its `<`)
//! - `offset2` = byte offset just past the closing `>`
//! - `length2` = remaining bytes to end of file
//!
//! Both the ByteRange numbers and the signature value are written as
//! fixed-width placeholders first and patched in place, so no offset moves.

use crate::error::{CryptoFailure, Error, Result};
use std::ops::Range;

/// Value written into every ByteRange slot before patching.
pub const BYTE_RANGE_PLACEHOLDER: i64 = 9_999_999_999;

/// Width of one patched ByteRange number.
const BYTE_RANGE_DIGITS: usize = 10;

/// Calculator for signature byte ranges.
#[derive(Debug, Clone, Copy)]
pub struct ByteRangeCalculator {
    /// Size of the `/Contents` value (hex digits + 2 for angle brackets)
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Create a calculator for signatures of `signature_len` bytes.
    ///
    /// Each byte becomes two hex digits, plus the `<` and `>` delimiters.
    pub fn new(signature_len: usize) -> Self {
        Self {
            placeholder_size: signature_len * 2 + 2,
        }
    }

    /// Get the placeholder size (for the /Contents value).
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Placeholder ByteRange array in its serialized form.
    pub fn byte_range_placeholder() -> String {
        Self::format_byte_range(&[BYTE_RANGE_PLACEHOLDER; 4])
    }

    /// Calculate the ByteRange given the position of the `/Contents` value.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;

        [0, before_sig, after_sig_start, after_sig_len]
    }

    /// Format a ByteRange array with fixed-width numbers.
    pub fn format_byte_range(byte_range: &[i64; 4]) -> String {
        format!(
            "[{:0w$} {:0w$} {:0w$} {:0w$}]",
            byte_range[0],
            byte_range[1],
            byte_range[2],
            byte_range[3],
            w = BYTE_RANGE_DIGITS
        )
    }

    /// Overwrite the placeholder ByteRange array starting at `offset`.
    pub fn patch_byte_range(data: &mut [u8], offset: usize, byte_range: &[i64; 4]) -> Result<()> {
        if byte_range.iter().any(|v| *v < 0 || *v > BYTE_RANGE_PLACEHOLDER) {
            return Err(Error::Crypto(CryptoFailure::PlaceholderOverflow));
        }
        let placeholder = Self::byte_range_placeholder();
        let end = offset + placeholder.len();
        if data.get(offset..end) != Some(placeholder.as_bytes()) {
            return Err(Error::Crypto(CryptoFailure::SigningFailed));
        }
        data[offset..end].copy_from_slice(Self::format_byte_range(byte_range).as_bytes());
        Ok(())
    }

    /// Concatenate the two covered ranges.
    pub fn extract_signed_bytes(data: &[u8], byte_range: &[usize; 4]) -> Option<Vec<u8>> {
        let first = data.get(byte_range[0]..byte_range[0].checked_add(byte_range[1])?)?;
        let second = data.get(byte_range[2]..byte_range[2].checked_add(byte_range[3])?)?;

        let mut signed_bytes = Vec::with_capacity(first.len() + second.len());
        signed_bytes.extend_from_slice(first);
        signed_bytes.extend_from_slice(second);
        Some(signed_bytes)
    }

    /// Check that a ByteRange covers the entire file except one gap, and
    /// return the gap.
    ///
    /// A valid ByteRange has four non-negative numbers, starts at 0, ends at
    /// the file size, and its first range ends before the second begins.
    pub fn validate_byte_range(byte_range: &[i64], file_size: usize) -> Option<([usize; 4], Range<usize>)> {
        let [o1, l1, o2, l2]: [i64; 4] = byte_range.try_into().ok()?;
        let values = [
            usize::try_from(o1).ok()?,
            usize::try_from(l1).ok()?,
            usize::try_from(o2).ok()?,
            usize::try_from(l2).ok()?,
        ];
        if values[0] != 0 || values[1] > values[2] {
            return None;
        }
        if values[2].checked_add(values[3])? != file_size {
            return None;
        }
        Some((values, values[1]..values[2]))
    }

    /// Find where the value of `/{key}` starts inside `window`.
    ///
    /// The returned offset is absolute and points at the first byte of the
    /// value after optional whitespace.
    pub fn find_value_offset(data: &[u8], window: Range<usize>, key: &str) -> Option<usize> {
        let search_end = window.end.min(data.len());
        let search_window = data.get(window.start..search_end)?;
        let pattern = format!("/{}", key);
        let pattern = pattern.as_bytes();

        let pos = search_window
            .windows(pattern.len())
            .position(|w| w == pattern)?;
        let value = pos
            + pattern.len()
            + search_window[pos + pattern.len()..]
                .iter()
                .take_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
                .count();
        Some(window.start + value)
    }

    /// Replace the `/Contents` placeholder with the signature.
    pub fn insert_signature(
        &self,
        data: &mut [u8],
        contents_offset: usize,
        signature: &[u8],
    ) -> Result<()> {
        let signature_hex = bytes_to_hex(signature);
        if signature_hex.len() + 2 > self.placeholder_size {
            return Err(Error::Crypto(CryptoFailure::PlaceholderOverflow));
        }

        let mut sig_value = String::with_capacity(self.placeholder_size);
        sig_value.push('<');
        sig_value.push_str(&signature_hex);
        let padding_needed = (self.placeholder_size - 2) - signature_hex.len();
        sig_value.extend(std::iter::repeat('0').take(padding_needed));
        sig_value.push('>');

        let end = contents_offset + self.placeholder_size;
        match data.get_mut(contents_offset..end) {
            Some(slot) if slot.first() == Some(&b'<') && slot.last() == Some(&b'>') => {
                slot.copy_from_slice(sig_value.as_bytes());
                Ok(())
            },
            _ => Err(Error::Crypto(CryptoFailure::SigningFailed)),
        }
    }
}

/// Convert bytes to an uppercase hex string.
fn bytes_to_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789ABCDEF";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}
