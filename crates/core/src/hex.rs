//! Intel HEX ROM image parser.
//!
//! Parses Intel HEX records (`:LLAAAATT[DD...]CC`) into a byte buffer laid
//! out as little-endian 16-bit ROM words. Record types 00 (data), 01 (EOF),
//! 02 (extended segment) and 04 (extended linear) are honored; start-address
//! records are ignored.

use crate::Error;

/// Parse an Intel HEX string into `image`.
///
/// Returns the number of bytes loaded (highest address reached). Data past
/// the end of `image` is an error, since it would silently drop ROM words.
pub fn parse_hex(hex: &str, image: &mut [u8]) -> Result<usize, Error> {
    let mut max_addr = 0usize;
    let mut base_addr: u32 = 0;

    for (lineno, line) in hex.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || !line.starts_with(':') {
            continue;
        }
        let bad = |msg: String| Error::Hex { line: lineno + 1, msg };

        let bytes = hex_line_to_bytes(&line[1..]).map_err(bad)?;
        if bytes.len() < 5 {
            return Err(bad("record too short".into()));
        }

        let byte_count = bytes[0] as usize;
        let addr = ((bytes[1] as u16) << 8) | bytes[2] as u16;
        let record_type = bytes[3];
        if bytes.len() != byte_count + 5 {
            return Err(bad(format!("length {} does not match byte count {}", bytes.len(), byte_count)));
        }

        let sum: u8 = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            return Err(bad(format!("checksum error: sum={:02X}", sum)));
        }

        match record_type {
            0x00 => {
                let full_addr = (base_addr + addr as u32) as usize;
                let end = full_addr + byte_count;
                if end > image.len() {
                    return Err(bad(format!("data at {:#06X} past end of ROM", end)));
                }
                image[full_addr..end].copy_from_slice(&bytes[4..4 + byte_count]);
                max_addr = max_addr.max(end);
            }
            0x01 => break,
            0x02 if byte_count >= 2 => {
                base_addr = (((bytes[4] as u32) << 8) | bytes[5] as u32) << 4;
            }
            0x04 if byte_count >= 2 => {
                base_addr = ((bytes[4] as u32) << 8 | bytes[5] as u32) << 16;
            }
            _ => {}
        }
    }

    Ok(max_addr)
}

/// Convert hex character pairs to bytes
fn hex_line_to_bytes(hex_str: &str) -> Result<Vec<u8>, String> {
    if !hex_str.is_ascii() {
        return Err("non-ASCII characters in record".into());
    }
    if hex_str.len() % 2 != 0 {
        return Err("odd number of hex characters".into());
    }
    (0..hex_str.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex_str[i..i + 2], 16)
                .map_err(|_| format!("invalid hex digits: {}", &hex_str[i..i + 2]))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_hex() {
        let hex = ":040000003002440284\n:00000001FF\n";
        let mut image = vec![0u8; 64];
        let size = parse_hex(hex, &mut image).unwrap();
        assert_eq!(size, 4);
        assert_eq!(&image[..4], &[0x30, 0x02, 0x44, 0x02]);
    }

    #[test]
    fn test_checksum_error() {
        let hex = ":0400000030024402FF\n:00000001FF\n";
        let mut image = vec![0u8; 64];
        assert!(parse_hex(hex, &mut image).is_err());
    }

    #[test]
    fn test_past_end() {
        let hex = ":040000003002440284\n";
        let mut image = vec![0u8; 2];
        assert!(parse_hex(hex, &mut image).is_err());
    }

    #[test]
    fn test_empty_hex() {
        let hex = ":00000001FF\n";
        let mut image = vec![0u8; 64];
        let size = parse_hex(hex, &mut image).unwrap();
        assert_eq!(size, 0);
    }
}
