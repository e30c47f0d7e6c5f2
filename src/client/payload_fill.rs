use anyhow::bail;
use bytes::Bytes;

use crate::messaging::packet::MAX_BODY_SIZE;
use crate::util::safe_converter::SafeCast;

/// Determines the body of every data packet a client originates. The variants are mutually
///  exclusive, so setting a new fill replaces whatever was configured before.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PayloadFill {
    /// `size` bytes with contents nobody cares about (they are sent as zeroes)
    Unspecified { size: u32 },
    /// The bytes of a string, without any terminator
    Text(Bytes),
    /// `pattern` repeated (and truncated at the end) to fill exactly `size` bytes
    Repeating { pattern: Bytes, size: u32 },
}

impl Default for PayloadFill {
    fn default() -> Self {
        PayloadFill::Unspecified { size: 100 }
    }
}

impl PayloadFill {
    pub fn unspecified(size: u32) -> PayloadFill {
        PayloadFill::Unspecified { size }
    }

    pub fn text(text: &str) -> PayloadFill {
        PayloadFill::Text(Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn repeating_byte(fill: u8, size: u32) -> PayloadFill {
        PayloadFill::Repeating {
            pattern: Bytes::copy_from_slice(&[fill]),
            size,
        }
    }

    pub fn repeating(pattern: &[u8], size: u32) -> PayloadFill {
        PayloadFill::Repeating {
            pattern: Bytes::copy_from_slice(pattern),
            size,
        }
    }

    /// The number of body bytes in each data packet
    pub fn effective_size(&self) -> u32 {
        match self {
            PayloadFill::Unspecified { size } => *size,
            PayloadFill::Text(text) => u32::try_from(text.len()).unwrap_or(u32::MAX),
            PayloadFill::Repeating { size, .. } => *size,
        }
    }

    /// Checks that the body fits into a single datagram
    pub fn validate(&self) -> anyhow::Result<()> {
        let size: usize = self.effective_size().safe_cast();
        if size > MAX_BODY_SIZE {
            bail!("payload of {} bytes exceeds the maximum of {} bytes per packet", size, MAX_BODY_SIZE);
        }
        Ok(())
    }

    pub fn build_body(&self) -> Bytes {
        match self {
            PayloadFill::Unspecified { size } => Bytes::from(vec![0u8; size.safe_cast()]),
            PayloadFill::Text(text) => text.clone(),
            PayloadFill::Repeating { pattern, size } => {
                if pattern.is_empty() {
                    return Bytes::from(vec![0u8; size.safe_cast()]);
                }
                pattern.iter()
                    .cycle()
                    .take(size.safe_cast())
                    .copied()
                    .collect::<Vec<_>>()
                    .into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::unspecified(PayloadFill::unspecified(5), 5, b"\0\0\0\0\0")]
    #[case::unspecified_empty(PayloadFill::unspecified(0), 0, b"")]
    #[case::text(PayloadFill::text("hello"), 5, b"hello")]
    #[case::text_empty(PayloadFill::text(""), 0, b"")]
    #[case::byte(PayloadFill::repeating_byte(b'x', 4), 4, b"xxxx")]
    #[case::pattern_repeated(PayloadFill::repeating(b"abc", 8), 8, b"abcabcab")]
    #[case::pattern_truncated(PayloadFill::repeating(b"abcdef", 3), 3, b"abc")]
    #[case::pattern_exact(PayloadFill::repeating(b"abc", 3), 3, b"abc")]
    #[case::pattern_empty(PayloadFill::repeating(b"", 2), 2, b"\0\0")]
    fn test_fill(#[case] fill: PayloadFill, #[case] expected_size: u32, #[case] expected_body: &[u8]) {
        assert_eq!(fill.effective_size(), expected_size);

        let body = fill.build_body();
        assert_eq!(body.as_ref(), expected_body);
        assert_eq!(body.len(), expected_size as usize);
    }

    #[rstest]
    #[case::empty(PayloadFill::unspecified(0), true)]
    #[case::max(PayloadFill::unspecified(MAX_BODY_SIZE as u32), true)]
    #[case::too_big(PayloadFill::unspecified(MAX_BODY_SIZE as u32 + 1), false)]
    #[case::too_big_pattern(PayloadFill::repeating_byte(1, 70_000), false)]
    #[case::text(PayloadFill::text("hello"), true)]
    fn test_validate(#[case] fill: PayloadFill, #[case] expected_valid: bool) {
        assert_eq!(fill.validate().is_ok(), expected_valid);
    }

    #[test]
    fn test_default() {
        assert_eq!(PayloadFill::default().effective_size(), 100);
    }
}
