//! Predictor decoding for Flate streams.
//!
//! Cross-reference streams are almost always written with `/Predictor 12`
//! (PNG Up), so PNG rows carry a per-row tag byte that selects the algorithm.

use crate::error::{Error, Result};

/// Decode parameters for stream decoders.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG)
    pub predictor: i64,
    /// Number of columns (width in samples)
    pub columns: usize,
    /// Number of color components per sample
    pub colors: usize,
    /// Bits per component
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    /// Bytes of sample data per row, without the PNG tag byte.
    pub fn pixel_bytes_per_row(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    /// Bytes per sample, at least one.
    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Reverse the predictor named in `params`.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => decode_tiff_predictor(data, params),
        10..=15 => decode_png_predictor(data, params),
        other => Err(Error::StreamDecode(format!("Unsupported predictor: {}", other))),
    }
}

/// TIFF Predictor 2: each sample is the difference from its left neighbour.
fn decode_tiff_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_len = params.pixel_bytes_per_row();
    let bpp = params.bytes_per_pixel();
    if row_len == 0 || data.len() % row_len != 0 {
        return Err(Error::StreamDecode(format!(
            "Data length {} is not a multiple of row size {}",
            data.len(),
            row_len
        )));
    }

    let mut output = Vec::with_capacity(data.len());
    for row in data.chunks(row_len) {
        let start = output.len();
        for (i, &byte) in row.iter().enumerate() {
            let left = if i >= bpp { output[start + i - bpp] } else { 0 };
            output.push(byte.wrapping_add(left));
        }
    }
    Ok(output)
}

/// PNG predictors (10-15). Every row starts with its own algorithm tag.
fn decode_png_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let pixel_bytes = params.pixel_bytes_per_row();
    let row_len = pixel_bytes + 1;
    if data.len() % row_len != 0 {
        return Err(Error::StreamDecode(format!(
            "Data length {} is not a multiple of row size {}",
            data.len(),
            row_len
        )));
    }

    let bpp = params.bytes_per_pixel();
    let mut output: Vec<u8> = Vec::with_capacity(data.len() / row_len * pixel_bytes);
    let mut prev = vec![0u8; pixel_bytes];

    for row in data.chunks(row_len) {
        let tag = row[0];
        let encoded = &row[1..];
        let mut current = vec![0u8; pixel_bytes];

        for i in 0..pixel_bytes {
            let left = if i >= bpp { current[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let predicted = match tag {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth_predictor(left, up, up_left),
                _ => {
                    return Err(Error::StreamDecode(format!("Invalid PNG predictor tag: {}", tag)))
                },
            };
            current[i] = encoded[i].wrapping_add(predicted);
        }

        output.extend_from_slice(&current);
        prev = current;
    }

    Ok(output)
}

/// Paeth predictor function from the PNG specification.
fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let (ia, ib, ic) = (a as i16, b as i16, c as i16);
    let p = ia + ib - ic;
    let pa = (p - ia).abs();
    let pb = (p - ib).abs();
    let pc = (p - ic).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_up_predictor() {
        let params = DecodeParams {
            predictor: 12,
            columns: 5,
            colors: 1,
            bits_per_component: 8,
        };
        let encoded = vec![
            2, 10, 20, 30, 40, 50, // first row, nothing above
            2, 5, 5, 5, 5, 5,
        ];
        let result = decode_predictor(&encoded, &params).unwrap();
        assert_eq!(result, vec![10, 20, 30, 40, 50, 15, 25, 35, 45, 55]);
    }

    #[test]
    fn test_png_sub_predictor() {
        let params = DecodeParams {
            predictor: 11,
            columns: 4,
            ..Default::default()
        };
        let result = decode_predictor(&[1, 1, 1, 1, 1], &params).unwrap();
        assert_eq!(result, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_png_bad_row_length() {
        let params = DecodeParams {
            predictor: 12,
            columns: 5,
            ..Default::default()
        };
        assert!(decode_predictor(&[2, 1, 2], &params).is_err());
    }

    #[test]
    fn test_tiff_predictor() {
        let params = DecodeParams {
            predictor: 2,
            columns: 3,
            ..Default::default()
        };
        let result = decode_predictor(&[5, 1, 1, 7, 0, 2], &params).unwrap();
        assert_eq!(result, vec![5, 6, 7, 7, 7, 9]);
    }

    #[test]
    fn test_paeth() {
        assert_eq!(paeth_predictor(10, 20, 10), 20);
        assert_eq!(paeth_predictor(20, 10, 10), 20);
    }
}
