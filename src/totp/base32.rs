//! Lenient RFC 4648 base32 used for `TOTP` secrets.
//!
//! Decoding never fails: unknown symbols (padding, spaces, dashes) are dropped
//! and trailing bits that do not fill a byte are ignored.

pub const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

fn symbol_value(symbol: u8) -> Option<u8> {
    match symbol {
        b'A'..=b'Z' => Some(symbol - b'A'),
        b'2'..=b'7' => Some(symbol - b'2' + 26),
        _ => None,
    }
}

/// Decode a base32 secret into raw key bytes.
#[must_use]
pub fn decode(secret: &str) -> Vec<u8> {
    let mut output = Vec::with_capacity(secret.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for value in secret
        .bytes()
        .map(|b| b.to_ascii_uppercase())
        .filter_map(symbol_value)
    {
        buffer = (buffer << 5) | u32::from(value);
        bits += 5;

        if bits >= 8 {
            bits -= 8;
            output.push(((buffer >> bits) & 0xFF) as u8);
        }
        buffer &= (1 << bits) - 1;
    }

    output
}

/// Encode raw bytes as unpadded base32.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for &byte in bytes {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            output.push(char::from(ALPHABET[((buffer >> bits) & 0x1F) as usize]));
        }
        buffer &= (1 << bits) - 1;
    }

    if bits > 0 {
        output.push(char::from(ALPHABET[((buffer << (5 - bits)) & 0x1F) as usize]));
    }

    output
}
