//! Witness-vector encoding
//!
//! The proof compiler takes its arguments as one flat list of decimal
//! numbers. Each logical input is given as `(hex, encoding, packets)` and
//! expanded here; the order of elements and the packing of each must match
//! the compiled circuit exactly.
//!
//! Encodings:
//! - `bits`: one number per bit, four per hex digit, most significant first
//! - `bytes`: one number per byte
//! - `field`: `packets` 128-bit chunks, most significant chunk first

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{decode_hex, strip_0x};
use crate::error::EncodingError;

/// Bits per field packet
pub const PACKET_BITS: usize = 128;

const PACKET_BYTES: usize = PACKET_BITS / 8;

/// How a hex value is expanded into witness numbers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingKind {
    Bits,
    Bytes,
    Field,
}

impl FromStr for EncodingKind {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bits" => Ok(EncodingKind::Bits),
            "bytes" => Ok(EncodingKind::Bytes),
            "field" => Ok(EncodingKind::Field),
            other => Err(EncodingError::UnknownEncoding(other.to_string())),
        }
    }
}

impl fmt::Display for EncodingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EncodingKind::Bits => "bits",
            EncodingKind::Bytes => "bytes",
            EncodingKind::Field => "field",
        })
    }
}

/// One logical witness input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub hex: String,
    pub kind: EncodingKind,
    /// Number of field packets; ignored for `bits` and `bytes`
    pub packets: usize,
}

impl Element {
    pub fn new(hex: impl Into<String>, kind: EncodingKind, packets: usize) -> Self {
        Self {
            hex: hex.into(),
            kind,
            packets,
        }
    }

    /// Shorthand for a `field` element
    pub fn field(hex: impl Into<String>, packets: usize) -> Self {
        Self::new(hex, EncodingKind::Field, packets)
    }

    /// Expand this element into witness numbers
    pub fn encode(&self) -> Result<Vec<u128>, EncodingError> {
        match self.kind {
            EncodingKind::Bits => encode_bits(&self.hex),
            EncodingKind::Bytes => encode_bytes(&self.hex),
            EncodingKind::Field => encode_field(&self.hex, self.packets),
        }
    }
}

fn encode_bits(hex: &str) -> Result<Vec<u128>, EncodingError> {
    let digits = strip_0x(hex.trim());
    let mut out = Vec::with_capacity(digits.len() * 4);
    for c in digits.chars() {
        let nibble = c
            .to_digit(16)
            .ok_or_else(|| EncodingError::InvalidHex(hex.to_string()))?;
        for shift in (0..4).rev() {
            out.push(u128::from((nibble >> shift) & 1));
        }
    }
    Ok(out)
}

fn encode_bytes(hex: &str) -> Result<Vec<u128>, EncodingError> {
    Ok(decode_hex(hex)?.into_iter().map(u128::from).collect())
}

fn encode_field(hex: &str, packets: usize) -> Result<Vec<u128>, EncodingError> {
    if packets == 0 {
        return Err(EncodingError::ZeroPackets);
    }
    let bytes = decode_hex(hex)?;
    let significant = match bytes.iter().position(|&b| b != 0) {
        Some(first) => &bytes[first..],
        None => &[][..],
    };

    let capacity = packets * PACKET_BITS;
    let bits = significant
        .first()
        .map(|b| (significant.len() - 1) * 8 + (8 - b.leading_zeros() as usize))
        .unwrap_or(0);
    if bits > capacity {
        return Err(EncodingError::Overflow { bits, capacity });
    }

    let mut padded = vec![0u8; packets * PACKET_BYTES];
    let offset = padded.len() - significant.len();
    padded[offset..].copy_from_slice(significant);

    Ok(padded
        .chunks(PACKET_BYTES)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0u128, |acc, &b| (acc << 8) | u128::from(b))
        })
        .collect())
}

/// Flattened witness ready for the prover
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessVector {
    pub values: Vec<u128>,
    /// Number of leading values that are public inputs
    pub public_len: usize,
}

impl WitnessVector {
    /// The public-input prefix the verifier sees
    pub fn public_inputs(&self) -> &[u128] {
        &self.values[..self.public_len.min(self.values.len())]
    }

    /// Decimal arguments for the compiler's `-a` flag
    pub fn to_args(&self) -> Vec<String> {
        self.values.iter().map(|v| v.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Flatten an ordered element list into one numeric vector
pub fn compute_vectors(elements: &[Element]) -> Result<Vec<u128>, EncodingError> {
    let mut values = Vec::new();
    for element in elements {
        values.extend(element.encode()?);
    }
    Ok(values)
}

/// Ordered witness elements, the first `public_elements` of which are public
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WitnessPlan {
    pub elements: Vec<Element>,
    pub public_elements: usize,
}

impl WitnessPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a public element. Public elements must precede private ones.
    pub fn public(mut self, element: Element) -> Self {
        debug_assert_eq!(self.public_elements, self.elements.len());
        self.elements.push(element);
        self.public_elements += 1;
        self
    }

    /// Append a private element
    pub fn private(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    pub fn encode(&self) -> Result<WitnessVector, EncodingError> {
        let public_len = compute_vectors(&self.elements[..self.public_elements])?.len();
        let values = compute_vectors(&self.elements)?;
        Ok(WitnessVector { values, public_len })
    }
}
