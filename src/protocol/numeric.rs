//! Packed-decimal NUMBER codec.
//!
//! Layout:
//! - byte 0: `2 * segments + sign` (odd means negative)
//! - byte 1: exponent as a signed power of 10000
//! - then one big-endian `u16` per base-10000 digit segment, most significant first
//!
//! Decoding first builds the intermediate text `[-]seg0[.seg1seg2...][E±exp*4]`,
//! then renders it the way the server displays numbers: values whose
//! estimated precision fits in [`PLAIN_PRECISION_LIMIT`] digits are printed
//! as plain decimals with trailing zeros stripped, larger ones in
//! normalized scientific notation.

use std::fmt;

/// Largest estimated precision rendered as a plain decimal.
pub const PLAIN_PRECISION_LIMIT: usize = 40;

/// Value range of a non-leading digit segment.
const SEGMENT_BASE: u16 = 10_000;

/// Most segments the one-byte header can announce.
pub const MAX_SEGMENTS: usize = 127;

/// Errors decoding a packed decimal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    /// Fewer than the two header bytes.
    MissingHeader,
    /// Header announces more segments than the value carries.
    Truncated { segments: usize, available: usize },
    /// A non-leading segment is not a base-10000 digit.
    SegmentOutOfRange(u16),
    /// More segments than the header byte can encode.
    TooManySegments(usize),
}

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericError::MissingHeader => write!(f, "packed decimal shorter than its header"),
            NumericError::Truncated {
                segments,
                available,
            } => write!(
                f,
                "packed decimal declares {} segments but carries {} bytes",
                segments, available
            ),
            NumericError::SegmentOutOfRange(v) => {
                write!(f, "digit segment {} out of range", v)
            }
            NumericError::TooManySegments(n) => {
                write!(f, "{} segments exceed the limit of {}", n, MAX_SEGMENTS)
            }
        }
    }
}

impl std::error::Error for NumericError {}

/// A decoded packed decimal, kept in segment form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedDecimal {
    pub negative: bool,
    /// Power of 10000 applied to the value.
    pub exponent: i8,
    /// Base-10000 digit segments, most significant first.
    pub segments: Vec<u16>,
}

impl PackedDecimal {
    pub fn decode(bytes: &[u8]) -> Result<Self, NumericError> {
        let Some(&head) = bytes.first() else {
            return Err(NumericError::MissingHeader);
        };
        let negative = head & 1 == 1;
        let count = (head >> 1) as usize;
        if count == 0 {
            return Ok(Self {
                negative,
                exponent: 0,
                segments: Vec::new(),
            });
        }
        if bytes.len() < 2 {
            return Err(NumericError::MissingHeader);
        }
        let exponent = bytes[1] as i8;
        let body = &bytes[2..];
        if body.len() < count * 2 {
            return Err(NumericError::Truncated {
                segments: count,
                available: body.len(),
            });
        }
        // The leading segment is printed as-is and may exceed four digits.
        let segments = body[..count * 2]
            .chunks_exact(2)
            .enumerate()
            .map(|(i, pair)| {
                let v = u16::from_be_bytes([pair[0], pair[1]]);
                if i > 0 && v >= SEGMENT_BASE {
                    Err(NumericError::SegmentOutOfRange(v))
                } else {
                    Ok(v)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            negative,
            exponent,
            segments,
        })
    }

    /// Encode back into the wire layout.
    pub fn encode(&self) -> Result<Vec<u8>, NumericError> {
        let count = self.segments.len();
        if count > MAX_SEGMENTS {
            return Err(NumericError::TooManySegments(count));
        }
        let mut out = Vec::with_capacity(2 + count * 2);
        out.push(((count as u8) << 1) | self.negative as u8);
        out.push(self.exponent as u8);
        for seg in &self.segments {
            out.extend_from_slice(&seg.to_be_bytes());
        }
        Ok(out)
    }

    pub fn is_zero(&self) -> bool {
        self.segments.iter().all(|&s| s == 0)
    }

    /// The intermediate text form, before display normalization.
    pub fn intermediate(&self) -> String {
        let Some((lead, rest)) = self.segments.split_first() else {
            return "0".to_string();
        };
        let mut s = String::with_capacity(8 + rest.len() * 4);
        if self.negative {
            s.push('-');
        }
        s.push_str(&lead.to_string());
        if !rest.is_empty() {
            s.push('.');
            for seg in rest {
                s.push_str(&format!("{:04}", seg));
            }
        }
        if self.exponent != 0 {
            s.push_str(&format!("E{:+}", self.exponent as i32 * 4));
        }
        s
    }

    /// Digits the server counts for display: width of the leading segment
    /// plus four per following segment.
    pub fn estimated_precision(&self) -> usize {
        let Some((&lead, rest)) = self.segments.split_first() else {
            return 1;
        };
        let lead_digits = match lead {
            0..=9 => 1,
            10..=99 => 2,
            100..=999 => 3,
            1000..=9999 => 4,
            _ => 5,
        };
        lead_digits + 4 * rest.len()
    }

    /// Render as the server displays it.
    pub fn to_display_string(&self) -> String {
        let digits = Digits::from_packed(self);
        if digits.is_zero() {
            return "0".to_string();
        }
        if self.estimated_precision() <= PLAIN_PRECISION_LIMIT {
            digits.stripped().plain()
        } else {
            digits.stripped().scientific()
        }
    }
}

impl fmt::Display for PackedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

/// Decode wire bytes straight to display text.
pub fn decode_numeric(bytes: &[u8]) -> Result<String, NumericError> {
    Ok(PackedDecimal::decode(bytes)?.to_display_string())
}

/// Unscaled digits and a decimal scale: value = digits × 10^-scale.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Digits {
    negative: bool,
    digits: String,
    scale: i64,
}

impl Digits {
    /// Same digits as the intermediate text, without the punctuation.
    fn from_packed(value: &PackedDecimal) -> Self {
        let (lead, rest) = match value.segments.split_first() {
            Some((&lead, rest)) => (lead, rest),
            None => (0, &[][..]),
        };
        let mut digits = String::with_capacity(5 + rest.len() * 4);
        digits.push_str(&lead.to_string());
        for seg in rest {
            digits.push_str(&format!("{:04}", seg));
        }
        let frac_len = rest.len() as i64 * 4;
        let exp = value.exponent as i64 * 4;
        let trimmed = digits.trim_start_matches('0');
        let digits = if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        };
        Self {
            negative: value.negative,
            digits,
            scale: frac_len - exp,
        }
    }

    fn is_zero(&self) -> bool {
        self.digits == "0"
    }

    fn stripped(mut self) -> Self {
        while self.digits.len() > 1 && self.digits.ends_with('0') {
            self.digits.pop();
            self.scale -= 1;
        }
        self
    }

    fn plain(&self) -> String {
        let mut out = String::with_capacity(self.digits.len() + 4);
        if self.negative {
            out.push('-');
        }
        let len = self.digits.len() as i64;
        if self.scale <= 0 {
            out.push_str(&self.digits);
            out.extend(std::iter::repeat_n('0', (-self.scale) as usize));
        } else if len > self.scale {
            let split = (len - self.scale) as usize;
            out.push_str(&self.digits[..split]);
            out.push('.');
            out.push_str(&self.digits[split..]);
        } else {
            out.push_str("0.");
            out.extend(std::iter::repeat_n('0', (self.scale - len) as usize));
            out.push_str(&self.digits);
        }
        out
    }

    fn scientific(&self) -> String {
        let adjusted = self.digits.len() as i64 - 1 - self.scale;
        let mut out = String::with_capacity(self.digits.len() + 8);
        if self.negative {
            out.push('-');
        }
        out.push_str(&self.digits[..1]);
        if self.digits.len() > 1 {
            out.push('.');
            out.push_str(&self.digits[1..]);
        }
        out.push_str(&format!("E{:+}", adjusted));
        out
    }
}
