use crate::bail;
use crate::error::{ErrorKind, SyncResult};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Encodes bytes in the PostgreSQL `bytea` hex format, `\x` followed by two digits per byte.
pub fn encode_bytea(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(2 + bytes.len() * 2);
    encoded.push_str("\\x");
    for byte in bytes {
        encoded.push(char::from(HEX_DIGITS[usize::from(byte >> 4)]));
        encoded.push(char::from(HEX_DIGITS[usize::from(byte & 0x0f)]));
    }
    encoded
}

/// Decodes the PostgreSQL `bytea` hex format.
pub fn parse_bytea_hex(bytea_hex_string: &str) -> SyncResult<Vec<u8>> {
    let Some(digits) = bytea_hex_string.strip_prefix("\\x") else {
        bail!(
            ErrorKind::ConversionError,
            "Could not convert from bytea hex string to byte array",
            "The prefix '\\x' is missing"
        );
    };

    if digits.len() % 2 != 0 {
        bail!(
            ErrorKind::ConversionError,
            "Could not convert from bytea hex string to byte array",
            "The number of digits is odd"
        );
    }

    let mut result = Vec::with_capacity(digits.len() / 2);
    for i in (0..digits.len()).step_by(2) {
        let Some(pair) = digits.get(i..i + 2) else {
            bail!(
                ErrorKind::ConversionError,
                "Could not convert from bytea hex string to byte array",
                "The digits are not ASCII"
            );
        };
        result.push(u8::from_str_radix(pair, 16)?);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_decodes_bytes() {
        assert_eq!(encode_bytea(b"Hello"), "\\x48656c6c6f");
        assert_eq!(parse_bytea_hex("\\x48656c6c6f").unwrap(), b"Hello");
        assert_eq!(parse_bytea_hex("\\x").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(
            parse_bytea_hex("48656c").unwrap_err().kind(),
            ErrorKind::ConversionError
        );
        assert!(parse_bytea_hex("\\x123").is_err());
        assert!(parse_bytea_hex("\\xzz").is_err());
    }
}
