use std::sync::OnceLock;

use regex::Regex;

use crate::error::VmError;

fn size_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*([KMGT]?)B?").expect("invalid size regex"))
}

/// Whole gigabytes in a size string as printed by `df`, `zpool` or a user.
///
/// Lenient: the first number-with-optional-suffix found anywhere in the
/// string is used, lowercase suffixes are accepted, a bare number means
/// gigabytes, fractions are floored after conversion. Anything unparsable is 0.
pub fn parse_size_gb(s: &str) -> u64 {
    let upper = s.trim().to_ascii_uppercase();
    let Some(caps) = size_re().captures(&upper) else {
        return 0;
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return 0;
    };

    let gb = match &caps[2] {
        "T" => value * 1024.0,
        "M" => value / 1024.0,
        "K" => value / (1024.0 * 1024.0),
        _ => value,
    };
    gb.floor() as u64
}

/// Strict check of a disk size handed to `qemu-img create`.
///
/// Accepts `20G`, `1.5G`, `512M`, `100K`, `1T` (optionally with a trailing
/// `B`). Returns the size in bytes, rounded down.
pub fn parse_disk_size(s: &str) -> Result<u64, VmError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(VmError::Validation {
            message: "disk size cannot be empty".into(),
        });
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (&s[..i], s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let invalid_number = || VmError::Validation {
        message: format!("invalid disk size number: '{num_str}'"),
    };
    let (whole, fraction) = num_str.split_once('.').unwrap_or((num_str, ""));
    let digits_only = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() || !digits_only(whole) || !digits_only(fraction) {
        return Err(invalid_number());
    }
    let num: f64 = num_str.parse().map_err(|_| invalid_number())?;

    let multiplier: u64 = match suffix.as_str() {
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        "T" | "TB" => 1024 * 1024 * 1024 * 1024,
        "" => {
            return Err(VmError::Validation {
                message: format!("disk size '{s}' needs a unit (K, M, G or T)"),
            });
        }
        _ => {
            return Err(VmError::Validation {
                message: format!("unknown disk size suffix: '{suffix}' (use G, M, K, or T)"),
            });
        }
    };

    let bytes = (num * multiplier as f64).floor();
    if bytes < 1.0 {
        return Err(VmError::Validation {
            message: "disk size must be greater than zero".into(),
        });
    }
    if bytes >= u64::MAX as f64 {
        return Err(VmError::Validation {
            message: format!("disk size overflows: '{s}'"),
        });
    }
    Ok(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_gb_table() {
        let cases = [
            ("100G", 100),
            ("2048M", 2),
            ("1024K", 0),
            ("1T", 1024),
            ("invalid", 0),
            ("", 0),
            ("50", 50),
            ("123.5G", 123),
            ("2.5T", 2560),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_size_gb(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn parse_size_gb_lowercase_and_suffix_b() {
        assert_eq!(parse_size_gb("100g"), 100);
        assert_eq!(parse_size_gb("3TB"), 3072);
        assert_eq!(parse_size_gb(" 512 G "), 512);
    }

    #[test]
    fn parse_disk_size_units() {
        assert_eq!(parse_disk_size("20G").unwrap(), 20 * 1024 * 1024 * 1024);
        assert_eq!(parse_disk_size("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_disk_size("1TB").unwrap(), 1024u64.pow(4));
    }

    #[test]
    fn parse_disk_size_rejects_garbage() {
        assert!(parse_disk_size("").is_err());
        assert!(parse_disk_size("20").is_err());
        assert!(parse_disk_size("10X").is_err());
        assert!(parse_disk_size("0G").is_err());
        assert!(parse_disk_size(".5G").is_err());
        assert!(parse_disk_size("1.2.3G").is_err());
        assert!(parse_disk_size("-1G").is_err());
        assert!(parse_disk_size("99999999999T").is_err());
    }

    #[test]
    fn parse_disk_size_fractions() {
        assert_eq!(parse_disk_size("1.5G").unwrap(), 1536 * 1024 * 1024);
        assert_eq!(parse_disk_size("0.5T").unwrap(), 512 * 1024 * 1024 * 1024);
        assert_eq!(parse_disk_size("2.G").unwrap(), 2 * 1024 * 1024 * 1024);
    }
}
