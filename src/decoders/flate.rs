//! FlateDecode (zlib/deflate) implementation.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// FlateDecode filter implementation.
pub struct FlateDecoder;

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        let zlib_err = match ZlibDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => return Ok(output),
            Err(e) => e,
        };

        // Truncated streams still carry a usable prefix
        if !output.is_empty() {
            log::warn!(
                "FlateDecode partial recovery: {} bytes before error: {}",
                output.len(),
                zlib_err
            );
            return Ok(output);
        }

        // Some writers omit the zlib wrapper
        log::debug!("zlib decode failed, trying raw deflate");
        output.clear();
        match DeflateDecoder::new(input).read_to_end(&mut output) {
            Ok(_) if !output.is_empty() => Ok(output),
            Err(_) if !output.is_empty() => {
                log::warn!("Raw deflate partial recovery: {} bytes", output.len());
                Ok(output)
            },
            _ => Err(Error::StreamDecode(format!(
                "FlateDecode decompression failed: {} (compressed size {} bytes)",
                zlib_err,
                input.len()
            ))),
        }
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}
