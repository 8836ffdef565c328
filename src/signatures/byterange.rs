//! ByteRange handling for PDF signatures.
//!
//! A `/ByteRange` is four integers `[offset1 length1 offset2 length2]`. The
//! gap `[offset1 + length1, offset2)` is exactly the hex `<...>` token of the
//! signature's `/Contents`; everything else up to the end of that revision
//! is signed.
//!
//! Both `/ByteRange` and `/Contents` are written as fixed-width placeholders
//! and patched in place once offsets and signature bytes are known, so no
//! other byte of the update moves.

use crate::crypto::algorithms::{DocumentHasher, HashAlgorithm};
use crate::error::{Error, Result};

/// Digits reserved per `/ByteRange` entry.
const BYTE_RANGE_DIGITS: usize = 10;

/// Width of the whole `/ByteRange` array token, brackets included.
pub const BYTE_RANGE_PLACEHOLDER_LEN: usize = 4 * BYTE_RANGE_DIGITS + 3 + 2;

/// A parsed `/ByteRange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ByteRange(pub [usize; 4]);

impl ByteRange {
    /// Build from the four PDF integers, rejecting negatives.
    pub fn from_pdf_integers(values: &[i64]) -> Result<Self> {
        if values.len() != 4 {
            return Err(Error::SignatureValidation(format!(
                "/ByteRange must hold 4 integers, found {}",
                values.len()
            )));
        }
        let mut out = [0usize; 4];
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = usize::try_from(*value).map_err(|_| {
                Error::SignatureValidation(format!("/ByteRange entry {} is negative", value))
            })?;
        }
        Ok(Self(out))
    }

    /// The excluded `/Contents` span `[start, end)`.
    pub fn contents_gap(&self) -> (usize, usize) {
        (self.0[0] + self.0[1], self.0[2])
    }

    /// End of the signed region, i.e. the size of the signed revision.
    pub fn end(&self) -> usize {
        self.0[2] + self.0[3]
    }

    /// Check the shape: starts at 0, ranges ordered, fits inside `file_size`.
    pub fn validate(&self, file_size: usize) -> Result<()> {
        let [offset1, length1, offset2, _] = self.0;
        if offset1 != 0 {
            return Err(Error::SignatureValidation(format!(
                "/ByteRange must start at 0, got {}",
                offset1
            )));
        }
        if length1 > offset2 {
            return Err(Error::SignatureValidation(format!(
                "/ByteRange first range ({}) overlaps second range start ({})",
                length1, offset2
            )));
        }
        if self.end() > file_size {
            return Err(Error::SignatureValidation(format!(
                "/ByteRange ends at {}, beyond file size {}",
                self.end(),
                file_size
            )));
        }
        Ok(())
    }

    /// Digest of the two signed ranges of `data`.
    pub fn digest(&self, data: &[u8], algorithm: HashAlgorithm) -> Result<Vec<u8>> {
        self.validate(data.len())
            .map_err(|e| Error::HashCalculation(e.to_string()))?;
        let [o1, l1, o2, l2] = self.0;
        let mut hasher = DocumentHasher::new(algorithm);
        hasher.update(&data[o1..o1 + l1]);
        hasher.update(&data[o2..o2 + l2]);
        Ok(hasher.finalize())
    }

    /// The raw `<...>` token bytes sitting in the gap.
    pub fn contents_token<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        let (start, end) = self.contents_gap();
        data.get(start..end)
    }

    /// Render as a fixed-width PDF array (always [`BYTE_RANGE_PLACEHOLDER_LEN`] bytes).
    pub fn to_padded_pdf_array(&self) -> Result<String> {
        let array = format!("[{} {} {} {}]", self.0[0], self.0[1], self.0[2], self.0[3]);
        if array.len() > BYTE_RANGE_PLACEHOLDER_LEN {
            return Err(Error::DocumentModification(format!(
                "/ByteRange {} does not fit its placeholder",
                array
            )));
        }
        Ok(format!("{:<width$}", array, width = BYTE_RANGE_PLACEHOLDER_LEN))
    }
}

/// Hash `data` with every span in `gaps` left out.
///
/// Gaps are sorted and merged first, so the result does not depend on their
/// order or on overlaps between them. Spans past the end are clipped.
pub fn digest_excluding(data: &[u8], gaps: &[(usize, usize)], algorithm: HashAlgorithm) -> Vec<u8> {
    let mut sorted: Vec<(usize, usize)> = gaps
        .iter()
        .map(|&(s, e)| (s.min(data.len()), e.min(data.len())))
        .filter(|(s, e)| s < e)
        .collect();
    sorted.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(sorted.len());
    for (start, end) in sorted {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let mut hasher = DocumentHasher::new(algorithm);
    let mut cursor = 0;
    for (start, end) in merged {
        hasher.update(&data[cursor..start]);
        cursor = end;
    }
    hasher.update(&data[cursor..]);
    hasher.finalize()
}

/// Places and fills `/ByteRange` and `/Contents` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct ByteRangeCalculator {
    /// Size of the `/Contents` token: hex digits plus the angle brackets
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Calculator reserving `reserved_bytes` of DER signature space.
    pub fn new(reserved_bytes: usize) -> Self {
        Self {
            placeholder_size: reserved_bytes * 2 + 2,
        }
    }

    /// Size of the `/Contents` token.
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Signature bytes that fit in the placeholder.
    pub fn capacity(&self) -> usize {
        (self.placeholder_size - 2) / 2
    }

    /// `<000...0>` of the reserved width.
    pub fn contents_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size - 2))
    }

    /// `[0000000000 ...]`, the fixed-width `/ByteRange` placeholder.
    pub fn byte_range_placeholder() -> String {
        let zeros = "0".repeat(BYTE_RANGE_DIGITS);
        format!("[{} {} {} {}]", zeros, zeros, zeros, zeros)
    }

    /// ByteRange for a file of `file_size` bytes whose `/Contents` token starts at `contents_offset`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> ByteRange {
        let after = contents_offset + self.placeholder_size;
        ByteRange([0, contents_offset, after, file_size.saturating_sub(after)])
    }

    /// Overwrite the `/ByteRange` placeholder at `offset`.
    pub fn patch_byte_range(data: &mut [u8], offset: usize, range: &ByteRange) -> Result<()> {
        let rendered = range.to_padded_pdf_array()?;
        let slot = data
            .get_mut(offset..offset + BYTE_RANGE_PLACEHOLDER_LEN)
            .ok_or_else(|| Error::DocumentModification("/ByteRange placeholder out of bounds".to_string()))?;
        if slot[0] != b'[' {
            return Err(Error::DocumentModification(format!(
                "no /ByteRange placeholder at offset {}",
                offset
            )));
        }
        slot.copy_from_slice(rendered.as_bytes());
        Ok(())
    }

    /// Write `signature` hex-encoded into the `/Contents` token at `contents_offset`, zero-padded.
    pub fn insert_signature(&self, data: &mut [u8], contents_offset: usize, signature: &[u8]) -> Result<()> {
        if signature.len() > self.capacity() {
            return Err(Error::DocumentModification(format!(
                "signature of {} bytes exceeds the {} bytes reserved for /Contents",
                signature.len(),
                self.capacity()
            )));
        }
        let slot = data
            .get_mut(contents_offset..contents_offset + self.placeholder_size)
            .ok_or_else(|| Error::DocumentModification("/Contents placeholder out of bounds".to_string()))?;
        if slot[0] != b'<' || slot[slot.len() - 1] != b'>' {
            return Err(Error::DocumentModification(format!(
                "no /Contents placeholder at offset {}",
                contents_offset
            )));
        }

        let hex: String = signature.iter().map(|b| format!("{:02X}", b)).collect();
        slot[1..1 + hex.len()].copy_from_slice(hex.as_bytes());
        for byte in &mut slot[1 + hex.len()..self.placeholder_size - 1] {
            *byte = b'0';
        }
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        Self::new(8192)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_size() {
        let calc = ByteRangeCalculator::new(1024);
        assert_eq!(calc.placeholder_size(), 2050);
        assert_eq!(calc.capacity(), 1024);
        assert_eq!(ByteRangeCalculator::default().contents_placeholder().len(), 16386);
    }

    #[test]
    fn test_calculate_byte_range() {
        let calc = ByteRangeCalculator::new(49);
        let range = calc.calculate_byte_range(1000, 400);
        assert_eq!(range, ByteRange([0, 400, 500, 500]));
        assert_eq!(range.contents_gap(), (400, 500));
        assert_eq!(range.end(), 1000);
    }

    #[test]
    fn test_padded_array_width() {
        let rendered = ByteRange([0, 100, 200, 300]).to_padded_pdf_array().unwrap();
        assert_eq!(rendered.len(), BYTE_RANGE_PLACEHOLDER_LEN);
        assert!(rendered.starts_with("[0 100 200 300]"));
        assert_eq!(ByteRangeCalculator::byte_range_placeholder().len(), BYTE_RANGE_PLACEHOLDER_LEN);
    }

    #[test]
    fn test_digest_of_ranges() {
        let data = b"AAA<0000>CCC";
        let range = ByteRange([0, 3, 9, 3]);
        assert_eq!(
            range.digest(data, HashAlgorithm::Sha256).unwrap(),
            HashAlgorithm::Sha256.digest(b"AAACCC")
        );
        assert_eq!(range.contents_token(data), Some(&b"<0000>"[..]));
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        assert!(ByteRange([10, 100, 150, 50]).validate(200).is_err());
        assert!(ByteRange([0, 100, 150, 100]).validate(200).is_err());
        assert!(ByteRange([0, 160, 150, 10]).validate(200).is_err());
        assert!(ByteRange([0, 100, 150, 50]).validate(200).is_ok());
        assert!(ByteRange([0, 100, 150, 50]).validate(400).is_ok());
    }

    #[test]
    fn test_from_pdf_integers() {
        assert!(ByteRange::from_pdf_integers(&[0, 1, 2]).is_err());
        assert!(ByteRange::from_pdf_integers(&[0, -1, 2, 3]).is_err());
        assert_eq!(ByteRange::from_pdf_integers(&[0, 1, 2, 3]).unwrap(), ByteRange([0, 1, 2, 3]));
    }

    #[test]
    fn test_digest_excluding_is_order_independent() {
        let data = b"0123456789abcdef";
        let a = digest_excluding(data, &[(2, 4), (8, 10)], HashAlgorithm::Sha256);
        let b = digest_excluding(data, &[(8, 10), (2, 4)], HashAlgorithm::Sha256);
        assert_eq!(a, b);
        assert_eq!(a, HashAlgorithm::Sha256.digest(b"014567abcdef"));
    }

    #[test]
    fn test_digest_excluding_merges_overlaps() {
        let data = b"0123456789";
        let merged = digest_excluding(data, &[(2, 6), (4, 8), (20, 30)], HashAlgorithm::Sha256);
        assert_eq!(merged, HashAlgorithm::Sha256.digest(b"0189"));
        assert_eq!(
            digest_excluding(data, &[], HashAlgorithm::Sha256),
            HashAlgorithm::Sha256.digest(data)
        );
    }

    #[test]
    fn test_insert_signature() {
        let calc = ByteRangeCalculator::new(4);
        let mut data = b"XX<00000000>YY".to_vec();
        calc.insert_signature(&mut data, 2, &[0xAB, 0xCD]).unwrap();
        assert_eq!(&data, b"XX<ABCD0000>YY");
    }

    #[test]
    fn test_insert_signature_too_large() {
        let calc = ByteRangeCalculator::new(4);
        let mut data = b"XX<00000000>YY".to_vec();
        assert!(calc.insert_signature(&mut data, 2, &[1, 2, 3, 4, 5]).is_err());
        assert!(calc.insert_signature(&mut data, 0, &[1]).is_err());
    }

    #[test]
    fn test_patch_byte_range() {
        let mut data = format!("/ByteRange {} /Contents", ByteRangeCalculator::byte_range_placeholder())
            .into_bytes();
        ByteRangeCalculator::patch_byte_range(&mut data, 11, &ByteRange([0, 5, 9, 7])).unwrap();
        let text = String::from_utf8(data).unwrap();
        assert!(text.starts_with("/ByteRange [0 5 9 7] "));
        assert!(text.ends_with("] /Contents") || text.ends_with(" /Contents"));
    }
}
