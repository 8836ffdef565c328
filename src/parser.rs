//! PDF object parser.
//!
//! Recursive descent over lexer tokens: read a token, decide the object kind,
//! and recurse into arrays and dictionaries. Indirect references are detected
//! by two-token lookahead (`N G R`).
//!
//! All parsing functions return nom's `IResult`; callers that need a crate
//! [`Error`] convert via [`parse_indirect_object_at`].

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Dict, Object, ObjectRef};
use nom::IResult;

/// Nesting limit for arrays and dictionaries.
const MAX_NESTING: usize = 256;

/// Decode escape sequences in PDF literal strings (Section 7.3.4.2).
///
/// ```
/// # use pdf_seal::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"Section \\247 1"), b"Section \xa7 1");
/// assert_eq!(decode_literal_string_escapes(b"a\\(b\\)"), b"a(b)");
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

        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(0x08),
            b'f' => result.push(0x0C),
            b'(' | b')' | b'\\' => result.push(escaped),
            // Line continuation
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut value = (escaped - b'0') as u32;
                let mut digits = 1;
                while digits < 3 {
                    match raw.get(i) {
                        Some(&d) if (b'0'..=b'7').contains(&d) => {
                            value = value * 8 + (d - b'0') as u32;
                            i += 1;
                            digits += 1;
                        },
                        _ => break,
                    }
                }
                result.push((value & 0xFF) as u8);
            },
            // Unknown escape: the backslash is dropped
            other => result.push(other),
        }
    }

    result
}

/// Parse a PDF object from input bytes.
///
/// ```
/// use pdf_seal::parser::parse_object;
///
/// let (_, obj) = parse_object(b"<< /ByteRange [0 10 20 30] /V 7 0 R >>").unwrap();
/// assert!(obj.as_dict().unwrap().contains_key("ByteRange"));
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_object_depth(input, 0)
}

fn parse_object_depth(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    if depth > MAX_NESTING {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }

    let (input, tok) = token(input)?;

    match tok {
        Token::Null => Ok((input, Object::Null)),
        Token::True => Ok((input, Object::Boolean(true))),
        Token::False => Ok((input, Object::Boolean(false))),

        Token::Integer(i) => {
            // Plain integer, or the start of "obj gen R"
            if let Ok((after_gen, Token::Integer(gen))) = token(input) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if i >= 0 && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(i as u32, gen as u16))));
                    }
                }
            }
            Ok((input, Object::Integer(i)))
        },

        Token::Real(r) => Ok((input, Object::Real(r))),

        Token::LiteralString(bytes) => Ok((input, Object::String(decode_literal_string_escapes(bytes)))),

        Token::HexString(hex_bytes) => match decode_hex(hex_bytes) {
            Ok(decoded) => Ok((input, Object::String(decoded))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::HexDigit,
            ))),
        },

        Token::Name(name) => Ok((input, Object::Name(name))),

        Token::ArrayStart => parse_array(input, depth),

        Token::DictStart => {
            let (remaining, dict) = parse_dictionary(input, depth)?;

            if let Ok((stream_input, Token::StreamStart)) = token(remaining) {
                let (final_input, stream_data) = parse_stream_data(stream_input, &dict)?;
                return Ok((
                    final_input,
                    Object::Stream {
                        dict,
                        data: bytes::Bytes::copy_from_slice(stream_data),
                    },
                ));
            }

            Ok((remaining, Object::Dictionary(dict)))
        },

        _ => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
    }
}

/// Parse stream data after the `stream` keyword (Section 7.3.8.1).
///
/// A direct `/Length` is trusted when `endstream` follows it; otherwise the
/// data runs to the next `endstream` keyword.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dict) -> IResult<&'a [u8], &'a [u8]> {
    let input = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        log::warn!("No EOL after stream keyword (ISO 32000-1:2008, 7.3.8.1)");
        input
    };

    if let Some(length) = dict.get("Length").and_then(|o| o.as_integer()) {
        let length = length.max(0) as usize;
        if length <= input.len() {
            let (data, after) = input.split_at(length);
            let (after_ws, _) = skip_ws(after)?;
            if let Ok((rest, Token::StreamEnd)) = token(after_ws) {
                return Ok((rest, data));
            }
        }
        log::warn!("Stream /Length {} does not reach endstream, scanning instead", length);
    }

    match find_endstream(input) {
        Some(pos) => {
            let mut end = pos;
            // The EOL before endstream is not part of the data
            if end > 0 && input[end - 1] == b'\n' {
                end -= 1;
            }
            if end > 0 && input[end - 1] == b'\r' {
                end -= 1;
            }
            Ok((&input[pos + b"endstream".len()..], &input[..end]))
        },
        None => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof))),
    }
}

fn find_endstream(input: &[u8]) -> Option<usize> {
    let keyword = b"endstream";
    input.windows(keyword.len()).position(|window| window == keyword)
}

/// Parse an array body after `[`. Unclosed arrays at EOF yield what was read.
fn parse_array(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    let mut objects = Vec::new();
    let mut remaining = input;

    loop {
        match token(remaining) {
            Ok((inp, Token::ArrayEnd)) => return Ok((inp, Object::Array(objects))),
            Ok(_) => {
                let (inp, obj) = parse_object_depth(remaining, depth + 1)?;
                objects.push(obj);
                remaining = inp;
            },
            Err(_) if skip_ws(remaining).map(|(r, _)| r.is_empty()).unwrap_or(true) => {
                log::warn!("Unterminated array at end of input");
                return Ok((&remaining[remaining.len()..], Object::Array(objects)));
            },
            Err(e) => return Err(e),
        }
    }
}

/// Parse a dictionary body after `<<`. Keys must be names.
fn parse_dictionary(input: &[u8], depth: usize) -> IResult<&[u8], Dict> {
    let mut dict = Dict::new();
    let mut remaining = input;

    loop {
        match token(remaining) {
            Ok((inp, Token::DictEnd)) => return Ok((inp, dict)),
            Ok((inp, Token::Name(key))) => {
                // A key directly followed by >> has a null value
                if let Ok((after, Token::DictEnd)) = token(inp) {
                    dict.insert(key, Object::Null);
                    return Ok((after, dict));
                }
                let (inp, value) = parse_object_depth(inp, depth + 1)?;
                dict.insert(key, value);
                remaining = inp;
            },
            Ok(_) => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    remaining,
                    nom::error::ErrorKind::Tag,
                )))
            },
            Err(_) if skip_ws(remaining).map(|(r, _)| r.is_empty()).unwrap_or(true) => {
                log::warn!("Unterminated dictionary at end of input");
                return Ok((&remaining[remaining.len()..], dict));
            },
            Err(e) => return Err(e),
        }
    }
}

/// Parse `N G obj <object> endobj` and return the reference and the object.
///
/// A missing `endobj` is tolerated.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (ObjectRef, Object)> {
    let (rest, id) = token(input)?;
    let (rest, gen) = token(rest)?;
    let (rest, kw) = token(rest)?;

    let obj_ref = match (id, gen, kw) {
        (Token::Integer(id), Token::Integer(gen), Token::ObjStart) if id >= 0 && gen >= 0 => {
            ObjectRef::new(id as u32, gen.min(u16::MAX as i64) as u16)
        },
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        },
    };

    let (rest, object) = parse_object(rest)?;
    let rest = match token(rest) {
        Ok((after, Token::ObjEnd)) => after,
        _ => rest,
    };

    Ok((rest, (obj_ref, object)))
}

/// Parse the indirect object starting at `offset` in `data`.
pub fn parse_indirect_object_at(data: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let slice = data.get(offset..).ok_or_else(|| Error::ParseError {
        offset,
        reason: format!("offset beyond end of file ({} bytes)", data.len()),
    })?;

    parse_indirect_object(slice)
        .map(|(_, parsed)| parsed)
        .map_err(|e| {
            let failed_at = match &e {
                nom::Err::Error(err) | nom::Err::Failure(err) => {
                    offset + slice.len().saturating_sub(err.input.len())
                },
                nom::Err::Incomplete(_) => data.len(),
            };
            Error::ParseError {
                offset: failed_at,
                reason: format!("invalid indirect object: {:?}", e.map(|err| err.code)),
            }
        })
}

/// Decode a hex string to bytes. Whitespace is ignored; an odd final digit is padded with 0.
///
/// ```
/// use pdf_seal::parser::decode_hex;
///
/// assert_eq!(decode_hex(b"48656C6C6F").unwrap(), b"Hello");
/// assert_eq!(decode_hex(b"7").unwrap(), vec![0x70]);
/// ```
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let nibble = |c: u8| -> Result<u8> {
        (c as char)
            .to_digit(16)
            .map(|d| d as u8)
            .ok_or_else(|| Error::ParseError {
                offset: 0,
                reason: format!("Invalid hex digit: {:?}", c as char),
            })
    };

    let mut result = Vec::with_capacity(digits.len() / 2 + 1);
    for pair in digits.chunks(2) {
        let high = nibble(pair[0])?;
        let low = match pair.get(1) {
            Some(&c) => nibble(c)?,
            None => 0,
        };
        result.push(high << 4 | low);
    }
    Ok(result)
}
