//! PDF lexer (tokenizer).
//!
//! Low-level tokenization of PDF byte streams, ISO 32000-1:2008, Section 7.2.
//! Whitespace (space, \t, \r, \n, \0, \f) and comments (% to EOL) are skipped
//! before every token.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

/// Token types recognized by the PDF lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g., 42, -123)
    Integer(i64),

    /// Real number (e.g., 3.14, -2.5, .5)
    Real(f64),

    /// Literal string bytes, escapes still encoded
    LiteralString(&'a [u8]),

    /// Hexadecimal string digits, whitespace preserved
    HexString(&'a [u8]),

    /// Name with `#XX` escapes decoded
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
}

fn nom_error(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// PDF whitespace characters (Table 1).
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter characters (Table 2).
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip all whitespace and comments.
pub fn skip_ws(input: &[u8]) -> IResult<&[u8], ()> {
    let mut remaining = input;
    loop {
        if let Ok((rest, _)) = take_while1::<_, _, nom::error::Error<&[u8]>>(is_whitespace)(remaining)
        {
            remaining = rest;
            continue;
        }
        if let Ok((rest, _)) = comment(remaining) {
            remaining = rest;
            continue;
        }
        break;
    }
    Ok((remaining, ()))
}

/// Parse an integer or real number.
///
/// Leading `+`/`-` and bare fractions (`.5`, `5.`) are accepted.
fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
    )))(input)?;

    let text = std::str::from_utf8(text).map_err(|_| nom_error(input, nom::error::ErrorKind::Digit))?;

    if text.contains('.') {
        // Rust's float parser rejects "5." and ".5" with a sign, normalise both
        let mut normalised = text.trim_start_matches('+').to_string();
        if normalised.ends_with('.') {
            normalised.push('0');
        }
        let normalised = normalised.replacen("-.", "-0.", 1);
        let normalised = if normalised.starts_with('.') {
            format!("0{}", normalised)
        } else {
            normalised
        };
        let num: f64 = normalised
            .parse()
            .map_err(|_| nom_error(input, nom::error::ErrorKind::Float))?;
        Ok((rest, Token::Real(num)))
    } else {
        let num: i64 = text
            .trim_start_matches('+')
            .parse()
            .map_err(|_| nom_error(input, nom::error::ErrorKind::Digit))?;
        Ok((rest, Token::Integer(num)))
    }
}

/// Parse a literal string enclosed in balanced parentheses.
///
/// Returns the raw bytes including escape sequences; decoding happens in the parser.
fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (remaining, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;

    while pos < remaining.len() {
        match remaining[pos] {
            // An escaped byte never changes depth
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&remaining[pos + 1..], Token::LiteralString(&remaining[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }

    Err(nom_error(input, nom::error::ErrorKind::Tag))
}

/// Parse a hexadecimal string enclosed in angle brackets.
fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom_error(input, nom::error::ErrorKind::Tag));
    }

    delimited(
        char('<'),
        map(take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)), Token::HexString),
        char('>'),
    )(input)
}

/// Decode `#XX` escape sequences in PDF names (Section 7.3.5).
///
/// Invalid sequences are kept literally.
///
/// ```
/// # use pdf_seal::lexer::decode_name_escapes;
/// assert_eq!(decode_name_escapes(b"A#20B#23C"), "A B#C");
/// assert_eq!(decode_name_escapes(b"Adobe.PPKLite"), "Adobe.PPKLite");
/// assert_eq!(decode_name_escapes(b"A#"), "A#");
/// ```
pub fn decode_name_escapes(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = &raw[i + 1..i + 3];
            if let Some(byte) = std::str::from_utf8(hex)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a name starting with /.
fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)), |bytes: &[u8]| {
            Token::Name(decode_name_escapes(bytes))
        }),
    )(input)
}

/// Parse PDF keywords and delimiters.
///
/// Multi-character keywords come first so `endstream` wins over `stream`
/// and `<<` wins over `<`.
fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, tok) = alt((
        value(Token::False, tag(b"false")),
        value(Token::True, tag(b"true")),
        value(Token::Null, tag(b"null")),
        value(Token::ObjEnd, tag(b"endobj")),
        value(Token::ObjStart, tag(b"obj")),
        value(Token::StreamEnd, tag(b"endstream")),
        value(Token::StreamStart, tag(b"stream")),
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
        value(Token::R, tag(b"R")),
    ))(input)?;

    // Alphabetic keywords must end at a token boundary ("Rect" is not "R")
    let alphabetic = !matches!(
        tok,
        Token::DictStart | Token::DictEnd | Token::ArrayStart | Token::ArrayEnd
    );
    if alphabetic {
        if let Some(&next) = rest.first() {
            if !is_whitespace(next) && !is_delimiter(next) {
                return Err(nom_error(input, nom::error::ErrorKind::Tag));
            }
        }
    }
    Ok((rest, tok))
}

/// Parse a single PDF token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, _) = skip_ws(input)?;
    alt((parse_keyword, parse_name, parse_number, parse_literal_string, parse_hex_string))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Numbers
    // ========================================================================

    #[test]
    fn test_parse_integers() {
        assert_eq!(token(b"42"), Ok((&b""[..], Token::Integer(42))));
        assert_eq!(token(b"-123"), Ok((&b""[..], Token::Integer(-123))));
        assert_eq!(token(b"+17"), Ok((&b""[..], Token::Integer(17))));
    }

    #[test]
    fn test_parse_reals() {
        assert_eq!(token(b"-2.5"), Ok((&b""[..], Token::Real(-2.5))));
        assert_eq!(token(b".5"), Ok((&b""[..], Token::Real(0.5))));
        assert_eq!(token(b"5."), Ok((&b""[..], Token::Real(5.0))));
        assert_eq!(token(b"-.002"), Ok((&b""[..], Token::Real(-0.002))));
    }

    // ========================================================================
    // Strings
    // ========================================================================

    #[test]
    fn test_parse_literal_string_nested() {
        let result = token(b"(Signed (twice) by Seal)");
        assert_eq!(result, Ok((&b""[..], Token::LiteralString(b"Signed (twice) by Seal"))));
    }

    #[test]
    fn test_parse_literal_string_escaped_paren() {
        let result = token(b"(a\\)b) rest");
        assert_eq!(result, Ok((&b" rest"[..], Token::LiteralString(b"a\\)b"))));
    }

    #[test]
    fn test_unterminated_literal_string() {
        assert!(token(b"(never closed").is_err());
    }

    #[test]
    fn test_parse_hex_string_with_whitespace() {
        let result = token(b"<48 65\n6C>");
        assert_eq!(result, Ok((&b""[..], Token::HexString(b"48 65\n6C"))));
    }

    #[test]
    fn test_dict_vs_hex_string() {
        assert_eq!(token(b"<<").unwrap().1, Token::DictStart);
        assert_eq!(token(b"<00>").unwrap().1, Token::HexString(b"00"));
    }

    // ========================================================================
    // Names and keywords
    // ========================================================================

    #[test]
    fn test_parse_name_terminates_at_delimiter() {
        let result = token(b"/SubFilter/adbe.pkcs7.detached");
        assert_eq!(
            result,
            Ok((&b"/adbe.pkcs7.detached"[..], Token::Name("SubFilter".to_string())))
        );
    }

    #[test]
    fn test_parse_name_with_hex_escape() {
        assert_eq!(token(b"/A#20B").unwrap().1, Token::Name("A B".to_string()));
    }

    #[test]
    fn test_keywords() {
        assert_eq!(token(b"true").unwrap().1, Token::True);
        assert_eq!(token(b"null").unwrap().1, Token::Null);
        assert_eq!(token(b"endobj").unwrap().1, Token::ObjEnd);
        assert_eq!(token(b"endstream").unwrap().1, Token::StreamEnd);
        assert_eq!(token(b"R>>").unwrap().1, Token::R);
    }

    #[test]
    fn test_keyword_requires_boundary() {
        assert!(token(b"Rect").is_err());
        assert!(token(b"trueish").is_err());
    }

    #[test]
    fn test_skip_whitespace_and_comments() {
        let result = token(b"  % comment\r\n %another\n 7");
        assert_eq!(result, Ok((&b""[..], Token::Integer(7))));
    }

    #[test]
    fn test_reference_sequence() {
        let (rest, a) = token(b"12 0 R").unwrap();
        let (rest, b) = token(rest).unwrap();
        let (rest, r) = token(rest).unwrap();
        assert_eq!((a, b, r), (Token::Integer(12), Token::Integer(0), Token::R));
        assert!(rest.is_empty());
    }
}
