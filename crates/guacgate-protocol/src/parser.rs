// Incremental, boundary-aware framing for the Guacamole wire format.
//
// peek_instruction() decides whether one complete instruction is present in a
// byte buffer without consuming it, which lets the I/O layer accumulate
// partial reads across many small network packets and hand out exactly one
// instruction at a time.

use std::str;

use thiserror::Error;

/// Maximum length of a single element (opcode or argument) in code points.
///
/// Bounds memory use against a misbehaving peer; real instructions at the
/// tunnel layer are far smaller.
pub const MAX_ELEMENT_LENGTH: usize = 64 * 1024;

/// Error describing why instruction text is not valid wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid UTF-8 in instruction")]
    InvalidUtf8,

    #[error("invalid element length prefix")]
    InvalidLength,

    #[error("element length {0} exceeds maximum of {MAX_ELEMENT_LENGTH}")]
    ElementTooLong(usize),

    #[error("expected ',' or ';' after element, found {0:?}")]
    InvalidTerminator(char),

    #[error("missing ';' instruction terminator")]
    MissingTerminator,

    #[error("unexpected data after instruction terminator")]
    TrailingData,
}

/// Result of inspecting a buffer for a complete instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeekError {
    /// The buffer holds a valid prefix of an instruction; more data is needed.
    #[error("incomplete instruction")]
    Incomplete,

    /// The buffer can never become a valid instruction.
    #[error("malformed instruction: {0}")]
    Malformed(ParseError),
}

/// Checks whether `buf` starts with one complete instruction.
///
/// Returns the instruction's total length in bytes (terminator included) if
/// so. A partial trailing UTF-8 sequence is reported as incomplete, an
/// invalid one as malformed.
pub fn peek_instruction(buf: &[u8]) -> Result<usize, PeekError> {
    let text = match str::from_utf8(buf) {
        Ok(text) => text,
        Err(e) if e.error_len().is_some() => {
            return Err(PeekError::Malformed(ParseError::InvalidUtf8));
        }
        Err(e) => {
            // valid_up_to() is always a char boundary
            str::from_utf8(&buf[..e.valid_up_to()]).expect("validated prefix")
        }
    };

    let mut pos = 0usize;
    loop {
        let (value_end, _) = parse_element(text, pos)?;
        match text[value_end..].chars().next() {
            None => return Err(PeekError::Incomplete),
            Some(',') => pos = value_end + 1,
            Some(';') => return Ok(value_end + 1),
            Some(c) => return Err(PeekError::Malformed(ParseError::InvalidTerminator(c))),
        }
    }
}

/// Parses one `<len>.<value>` element starting at byte offset `pos`.
///
/// Returns the byte offset just past the value together with the value
/// itself. The offset points at the element's terminator, which the caller
/// validates.
fn parse_element(text: &str, pos: usize) -> Result<(usize, &str), PeekError> {
    let rest = &text[pos..];

    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits == rest.len() {
        return Err(PeekError::Incomplete);
    }
    if digits == 0 || !rest[digits..].starts_with('.') {
        return Err(PeekError::Malformed(ParseError::InvalidLength));
    }

    let len: usize = rest[..digits]
        .parse()
        .map_err(|_| PeekError::Malformed(ParseError::InvalidLength))?;
    if len > MAX_ELEMENT_LENGTH {
        return Err(PeekError::Malformed(ParseError::ElementTooLong(len)));
    }

    // Advance over `len` code points of element value.
    let value_start = pos + digits + 1;
    let mut value_bytes = 0usize;
    let mut counted = 0usize;
    for c in text[value_start..].chars() {
        if counted == len {
            break;
        }
        value_bytes += c.len_utf8();
        counted += 1;
    }
    if counted < len {
        return Err(PeekError::Incomplete);
    }

    let value_end = value_start + value_bytes;
    Ok((value_end, &text[value_start..value_end]))
}

/// Splits one complete instruction into its elements (opcode first).
///
/// `text` must be exactly one instruction, terminator included.
pub(crate) fn split_elements(text: &str) -> Result<Vec<&str>, ParseError> {
    let mut elements = Vec::new();
    let mut pos = 0usize;
    loop {
        let (value_end, value) = parse_element(text, pos).map_err(|e| match e {
            PeekError::Incomplete => ParseError::MissingTerminator,
            PeekError::Malformed(e) => e,
        })?;
        elements.push(value);
        match text[value_end..].chars().next() {
            None => return Err(ParseError::MissingTerminator),
            Some(',') => pos = value_end + 1,
            Some(';') => {
                if value_end + 1 != text.len() {
                    return Err(ParseError::TrailingData);
                }
                return Ok(elements);
            }
            Some(c) => return Err(ParseError::InvalidTerminator(c)),
        }
    }
}

/// Parses every complete instruction in `text`, in order.
///
/// Used by transports whose frames carry whole instructions (a WebSocket
/// text frame may batch several). Trailing incomplete data is an error since
/// frames are not split mid-instruction.
pub fn parse_instructions(text: &str) -> Result<Vec<crate::Instruction>, ParseError> {
    let mut instructions = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let len = peek_instruction(remaining.as_bytes()).map_err(|e| match e {
            PeekError::Incomplete => ParseError::MissingTerminator,
            PeekError::Malformed(e) => e,
        })?;
        instructions.push(crate::Instruction::parse(&remaining[..len])?);
        remaining = &remaining[len..];
    }
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_complete() {
        assert_eq!(peek_instruction(b"3.key,5.65507,1.1;"), Ok(18));
    }

    #[test]
    fn test_peek_with_trailing_data() {
        // Only the first instruction's length is reported
        assert_eq!(peek_instruction(b"4.sync,1.0;3.key"), Ok(11));
    }

    #[test]
    fn test_peek_incomplete() {
        assert_eq!(peek_instruction(b""), Err(PeekError::Incomplete));
        assert_eq!(peek_instruction(b"3"), Err(PeekError::Incomplete));
        assert_eq!(peek_instruction(b"3."), Err(PeekError::Incomplete));
        assert_eq!(peek_instruction(b"3.key"), Err(PeekError::Incomplete));
        assert_eq!(peek_instruction(b"3.key,5.655"), Err(PeekError::Incomplete));
    }

    #[test]
    fn test_peek_partial_utf8_is_incomplete() {
        // "é" = 0xC3 0xA9; cut after the first byte
        assert_eq!(
            peek_instruction(b"1.\xC3"),
            Err(PeekError::Incomplete)
        );
    }

    #[test]
    fn test_peek_invalid_utf8_is_malformed() {
        assert_eq!(
            peek_instruction(b"1.\xFF;"),
            Err(PeekError::Malformed(ParseError::InvalidUtf8))
        );
    }

    #[test]
    fn test_peek_bad_length_prefix() {
        assert_eq!(
            peek_instruction(b"x.key;"),
            Err(PeekError::Malformed(ParseError::InvalidLength))
        );
        assert_eq!(
            peek_instruction(b".key;"),
            Err(PeekError::Malformed(ParseError::InvalidLength))
        );
    }

    #[test]
    fn test_peek_length_overruns_delimiter() {
        // Prefix claims 9 characters but ';' arrives after 3; the ';' is
        // consumed as value text and the 'Z' lands where a delimiter must be.
        assert_eq!(
            peek_instruction(b"9.key;key;xZ"),
            Err(PeekError::Malformed(ParseError::InvalidTerminator('Z')))
        );
        // With no further bytes the prefix stays incomplete; the I/O layer
        // turns incomplete-at-EOF into a protocol error rather than hanging.
        assert_eq!(peek_instruction(b"9.key;"), Err(PeekError::Incomplete));
    }

    #[test]
    fn test_peek_element_too_long() {
        let huge = format!("{}.key;", MAX_ELEMENT_LENGTH + 1);
        assert!(matches!(
            peek_instruction(huge.as_bytes()),
            Err(PeekError::Malformed(ParseError::ElementTooLong(_)))
        ));
    }

    #[test]
    fn test_peek_counts_code_points_not_bytes() {
        // 4 code points, 5 bytes
        let data = "4.name,4.café;".as_bytes();
        assert_eq!(peek_instruction(data), Ok(data.len()));
    }

    #[test]
    fn test_parse_instructions_batch() {
        let parsed = parse_instructions("3.key,5.65507,1.1;4.sync,10.1234567890;").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].opcode, "key");
        assert_eq!(parsed[1].opcode, "sync");
    }

    #[test]
    fn test_parse_instructions_rejects_partial_tail() {
        assert_eq!(
            parse_instructions("4.sync,1.0;3.ke"),
            Err(ParseError::MissingTerminator)
        );
    }
}
