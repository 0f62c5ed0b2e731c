//! Human readable byte sizes, such as `4M` or `1.5KB`.
//!
//! Multiples are powers of 1024, units are case-insensitive and the trailing `B` is optional.

use crate::error::ConfigError;

const KB: u64 = 1 << 10;
const MB: u64 = 1 << 20;
const GB: u64 = 1 << 30;
const TB: u64 = 1 << 40;
const PB: u64 = 1 << 50;
const EB: u64 = 1 << 60;

/// Parses a size string into a byte count.
///
/// ```
/// use micro_chain::size::parse_size;
///
/// assert_eq!(parse_size("4M").unwrap(), 4 * 1024 * 1024);
/// assert_eq!(parse_size("512").unwrap(), 512);
/// assert_eq!(parse_size("1.5kb").unwrap(), 1536);
/// assert!(parse_size("4X").is_err());
/// ```
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let trimmed = input.trim();
    let split = trimmed.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    if number.is_empty() {
        return Err(ConfigError::invalid_size(input, "missing number"));
    }

    let multiple = unit_multiple(unit.strip_prefix(' ').unwrap_or(unit))
        .ok_or_else(|| ConfigError::invalid_size(input, format!("unknown unit '{unit}'")))?;

    match number.split_once('.') {
        None => {
            let value: u64 = number.parse().map_err(|e| ConfigError::invalid_size(input, e))?;
            value.checked_mul(multiple).ok_or_else(|| ConfigError::invalid_size(input, "size overflow"))
        }
        Some((int_part, fraction)) if !int_part.is_empty() && !fraction.is_empty() => {
            let value: f64 = number.parse().map_err(|e| ConfigError::invalid_size(input, e))?;
            #[allow(clippy::cast_precision_loss, reason = "multiples are exact powers of two")]
            let bytes = value * multiple as f64;
            #[allow(clippy::cast_precision_loss, reason = "only used as an upper bound")]
            let max = u64::MAX as f64;
            if bytes >= max {
                return Err(ConfigError::invalid_size(input, "size overflow"));
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "checked to be in range above")]
            let bytes = bytes as u64;
            Ok(bytes)
        }
        Some(_) => Err(ConfigError::invalid_size(input, "malformed number")),
    }
}

fn unit_multiple(unit: &str) -> Option<u64> {
    let unit = unit.to_ascii_uppercase();
    let multiple = match unit.strip_suffix('B').unwrap_or(&unit) {
        "" => 1,
        "K" => KB,
        "M" => MB,
        "G" => GB,
        "T" => TB,
        "P" => PB,
        "E" => EB,
        _ => return None,
    };
    Some(multiple)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bytes() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("100B").unwrap(), 100);
        assert_eq!(parse_size(" 100b ").unwrap(), 100);
    }

    #[test]
    fn units_with_and_without_suffix() {
        assert_eq!(parse_size("4K").unwrap(), 4 * KB);
        assert_eq!(parse_size("4KB").unwrap(), 4 * KB);
        assert_eq!(parse_size("4M").unwrap(), 4 * MB);
        assert_eq!(parse_size("4mb").unwrap(), 4 * MB);
        assert_eq!(parse_size("2G").unwrap(), 2 * GB);
        assert_eq!(parse_size("1T").unwrap(), TB);
        assert_eq!(parse_size("1P").unwrap(), PB);
        assert_eq!(parse_size("1E").unwrap(), EB);
        assert_eq!(parse_size("4 MB").unwrap(), 4 * MB);
    }

    #[test]
    fn fractions() {
        assert_eq!(parse_size("1.5K").unwrap(), 1536);
        assert_eq!(parse_size("0.5M").unwrap(), MB / 2);
    }

    #[test]
    fn invalid_inputs() {
        for input in ["", "M", "4X", "-4M", "1.M", ".5M", "1.2.3K", "4  M", "99999999999999999999", "16E"] {
            assert!(matches!(parse_size(input), Err(ConfigError::InvalidSize { .. })), "input {input:?}");
        }
    }

    #[test]
    fn error_message_names_the_input() {
        let e = parse_size("4X").unwrap_err();
        assert_eq!(e.to_string(), "invalid body-limit=4X: unknown unit 'X'");
    }
}
