// guacgate-protocol: Guacamole protocol instruction codec
//
// Implements the length-prefixed wire format used between Guacamole clients
// and the gateway:
//
//   <len>.<opcode>,<len>.<arg1>,<len>.<arg2>;
//
// Length prefixes count Unicode code points, not bytes, so argument values
// may contain the delimiter characters (',' ';' '.') without any escaping.

mod instruction;
mod parser;
mod status;

pub use instruction::{format_instruction, Instruction};
pub use parser::{
    parse_instructions, peek_instruction, ParseError, PeekError, MAX_ELEMENT_LENGTH,
};
pub use status::Status;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_instruction() {
        let instr = format_instruction("key", &["65507", "1"]);
        assert_eq!(instr, "3.key,5.65507,1.1;");
    }

    #[test]
    fn test_format_instruction_empty_args() {
        let instr = format_instruction("sync", &[]);
        assert_eq!(instr, "4.sync;");
    }

    #[test]
    fn test_format_counts_code_points() {
        // 'é' is two bytes but one code point
        let instr = format_instruction("name", &["café"]);
        assert_eq!(instr, "4.name,4.café;");
    }
}
