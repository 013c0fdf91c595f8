// Owned Guacamole instruction: one opcode plus ordered string arguments.

use std::fmt;

use crate::parser::{split_elements, ParseError};

/// A single Guacamole protocol instruction.
///
/// Immutable once constructed; has no identity beyond its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: String,
    pub args: Vec<String>,
}

impl Instruction {
    pub fn new(opcode: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args,
        }
    }

    /// Serialize to wire format, with code-point length prefixes.
    pub fn encode(&self) -> String {
        let mut result = String::new();
        push_element(&mut result, &self.opcode);
        for arg in &self.args {
            result.push(',');
            push_element(&mut result, arg);
        }
        result.push(';');
        result
    }

    /// Parse exactly one complete instruction, terminator included.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let elements = split_elements(text)?;
        let mut iter = elements.into_iter();
        let opcode = iter.next().unwrap_or_default().to_string();
        let args = iter.map(str::to_string).collect();
        Ok(Self { opcode, args })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn push_element(out: &mut String, element: &str) {
    out.push_str(&element.chars().count().to_string());
    out.push('.');
    out.push_str(element);
}

/// Format an instruction from borrowed parts without building an
/// [`Instruction`] first.
pub fn format_instruction(opcode: &str, args: &[&str]) -> String {
    let mut result = String::new();
    push_element(&mut result, opcode);
    for arg in args {
        result.push(',');
        push_element(&mut result, arg);
    }
    result.push(';');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_instruction() {
        let instr = Instruction::parse("3.key,5.65507,1.1;").unwrap();
        assert_eq!(instr.opcode, "key");
        assert_eq!(instr.args, vec!["65507", "1"]);
    }

    #[test]
    fn test_parse_empty_argument() {
        let instr = Instruction::parse("7.connect,0.;").unwrap();
        assert_eq!(instr.opcode, "connect");
        assert_eq!(instr.args, vec![""]);
    }

    #[test]
    fn test_parse_internal_opcode() {
        // Tunnel-internal instructions use the empty opcode
        let instr = Instruction::parse("0.,4.ping,13.1700000000000;").unwrap();
        assert_eq!(instr.opcode, "");
        assert_eq!(instr.args, vec!["ping", "1700000000000"]);
    }

    #[test]
    fn test_roundtrip_with_delimiters() {
        // Values containing every delimiter the legacy escaped scheme cared
        // about survive unchanged under length prefixing.
        let instr = Instruction::new(
            "clipboard",
            vec!["a,b;c\\d".to_string(), "x.y".to_string()],
        );
        let encoded = instr.encode();
        assert_eq!(Instruction::parse(&encoded).unwrap(), instr);
    }

    #[test]
    fn test_roundtrip_multibyte() {
        let instr = Instruction::new("name", vec!["日本語デスクトップ".to_string()]);
        let encoded = instr.encode();
        assert_eq!(encoded, "4.name,9.日本語デスクトップ;");
        assert_eq!(Instruction::parse(&encoded).unwrap(), instr);
    }

    #[test]
    fn test_parse_rejects_missing_terminator() {
        assert_eq!(
            Instruction::parse("3.key,5.65507,1.1"),
            Err(ParseError::MissingTerminator)
        );
    }

    #[test]
    fn test_parse_rejects_trailing_data() {
        assert_eq!(
            Instruction::parse("4.sync,1.0;3.key,1.1;"),
            Err(ParseError::TrailingData)
        );
    }
}
