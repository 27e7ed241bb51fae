use crate::error::{error_codes, KmeError, KmeResult};

/// Version tag of the packed bit encoding
pub const ENCODING_V1: u8 = 1;

const HEADER_LEN: usize = 5;

/// Encode 0/1 bits as `[version][bit_len: u32 BE][packed bits]`
///
/// Bits are packed MSB-first and the last byte is zero-padded. The explicit
/// length keeps leading zeros and the exact bit count.
pub fn encode_bits(bits: &[u8]) -> KmeResult<Vec<u8>> {
    let bit_len = u32::try_from(bits.len()).map_err(|_| {
        KmeError::invalid_parameter("bits", "at most u32::MAX bits", &bits.len().to_string())
    })?;

    let mut out = Vec::with_capacity(HEADER_LEN + bits.len().div_ceil(8));
    out.push(ENCODING_V1);
    out.extend_from_slice(&bit_len.to_be_bytes());

    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit > 1 {
                return Err(KmeError::invalid_parameter(
                    "bits",
                    "values 0 or 1",
                    &bit.to_string(),
                ));
            }
            byte |= bit << (7 - i);
        }
        out.push(byte);
    }

    Ok(out)
}

/// Decode the output of [`encode_bits`]
///
/// # Errors
///
/// `IntegrityError` on an unknown version, a truncated header, a body whose
/// size disagrees with the declared length, or non-zero padding bits.
pub fn decode_bits(encoded: &[u8]) -> KmeResult<Vec<u8>> {
    let malformed = |cause: &str| {
        KmeError::integrity_error("decode_bits", cause, error_codes::BIT_ENCODING_INVALID)
    };

    if encoded.len() < HEADER_LEN {
        return Err(malformed("truncated header"));
    }
    if encoded[0] != ENCODING_V1 {
        return Err(malformed(&format!("unknown encoding version {}", encoded[0])));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&encoded[1..HEADER_LEN]);
    let bit_len = u32::from_be_bytes(len_bytes) as usize;
    let body = &encoded[HEADER_LEN..];

    if body.len() != bit_len.div_ceil(8) {
        return Err(malformed("body length does not match declared bit length"));
    }

    let padding = body.len() * 8 - bit_len;
    if padding > 0 {
        let last = body[body.len() - 1];
        if last & ((1u8 << padding) - 1) != 0 {
            return Err(malformed("non-zero padding bits"));
        }
    }

    Ok((0..bit_len)
        .map(|i| (body[i / 8] >> (7 - (i % 8))) & 1)
        .collect())
}
