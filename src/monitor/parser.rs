//! Command line parsing.
//!
//! A command line is split into whitespace separated tokens, the first of
//! which names the command. Addresses are given in hexadecimal with a
//! two-character radix prefix, as in `showmappings 0xf0100000`.
use arrayvec::ArrayVec;

/// Maximum number of slots in an argument vector. The last slot is never
/// filled, so a line holds at most `MAXARGS - 1` tokens.
pub const MAXARGS: usize = 16;

/// Characters separating tokens.
pub const WHITESPACE: &str = "\t\r\n ";

/// The tokens of a command line, command name first.
pub type Arguments<'a> = ArrayVec<&'a str, { MAXARGS - 1 }>;

/// Errors raised while parsing a command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The line has more tokens than an argument vector holds.
    TooManyArguments {
        /// Reported limit.
        max: usize,
    },
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TooManyArguments { max } => write!(f, "Too many arguments (max {max})"),
        }
    }
}

/// Split `line` into tokens.
///
/// Tokens are separated by runs of [`WHITESPACE`]; a NUL character ends the
/// line. A line with no tokens gives an empty vector.
///
/// # Errors
/// [`ParseError::TooManyArguments`] if the line has more than `MAXARGS - 1`
/// tokens. No partial vector is returned.
pub fn tokenize(line: &str) -> Result<Arguments<'_>, ParseError> {
    let line = line.split('\0').next().unwrap_or_default();
    let mut argv = Arguments::new();
    for token in line
        .split(|c: char| WHITESPACE.contains(c))
        .filter(|token| !token.is_empty())
    {
        argv.try_push(token)
            .map_err(|_| ParseError::TooManyArguments { max: MAXARGS })?;
    }
    Ok(argv)
}

/// Value of the hexadecimal digit `c`. Anything that is not a hex digit
/// counts as 0.
pub const fn hex_digit(c: u8) -> usize {
    (match c {
        b'0'..=b'9' => c - b'0',
        b'A'..=b'F' => c - b'A' + 10,
        b'a'..=b'f' => c - b'a' + 10,
        _ => 0,
    }) as usize
}

/// Parse a hexadecimal address.
///
/// The first two bytes of `token` are skipped whatever they are; the rest is
/// read most significant digit first. Digits shifted past the width of
/// `usize` are lost, and characters that are not hex digits count as 0.
/// There is no error: a token of two bytes or fewer is 0.
///
/// ```
/// use kmon::monitor::parser::parse_hex_address;
///
/// assert_eq!(parse_hex_address("0xf0100000"), 0xf010_0000);
/// assert_eq!(parse_hex_address("0XAB000"), 0xab000);
/// assert_eq!(parse_hex_address("0x1g"), 0x10);
/// ```
pub fn parse_hex_address(token: &str) -> usize {
    token
        .bytes()
        .skip(2)
        .fold(0usize, |acc, c| acc.wrapping_mul(16).wrapping_add(hex_digit(c)))
}
