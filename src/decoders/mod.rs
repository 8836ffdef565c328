//! Stream decoders needed to read document structure.
//!
//! Signing only ever has to look inside cross-reference streams and object
//! streams, which in practice are always FlateDecode with an optional PNG
//! predictor. Other filters are reported as unsupported.

use crate::error::{Error, Result};

mod flate;
mod predictor;

pub use flate::FlateDecoder;
pub use predictor::{decode_predictor, DecodeParams};

/// Upper bound on decoded stream size (decompression bomb protection).
const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// Trait for PDF stream decoders.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Get the name of this decoder (e.g., "FlateDecode").
    fn name(&self) -> &str;
}

/// Decode stream data using a filter pipeline with optional decode parameters.
///
/// Filters are applied in order; the predictor (if any) runs after the last filter.
pub fn decode_stream_with_params(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter_name in filters {
        let decoder: Box<dyn StreamDecoder> = match filter_name.as_str() {
            "FlateDecode" | "Fl" => Box::new(FlateDecoder),
            other => return Err(Error::Unsupported(format!("stream filter /{}", other))),
        };

        current = decoder.decode(&current)?;

        if current.len() > MAX_DECOMPRESSED_SIZE {
            return Err(Error::StreamDecode(format!(
                "decoded size {} bytes exceeds limit {} bytes",
                current.len(),
                MAX_DECOMPRESSED_SIZE
            )));
        }
    }

    if let Some(params) = params {
        if params.predictor > 1 {
            current = decode_predictor(&current, params)?;
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stream_no_filters() {
        let data = b"Hello, World!";
        let result = decode_stream_with_params(data, &[], None).unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn test_decode_stream_unsupported_filter() {
        let filters = vec!["DCTDecode".to_string()];
        match decode_stream_with_params(b"test", &filters, None) {
            Err(Error::Unsupported(msg)) => assert!(msg.contains("DCTDecode")),
            other => panic!("Expected Unsupported error, got {:?}", other),
        }
    }
}
