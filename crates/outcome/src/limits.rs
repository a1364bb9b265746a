//! Ceilings every container run stays under. Operators may tighten them,
//! never loosen them.

/// Largest memory cap a run may be given (512 MiB).
pub const MAX_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

/// Share of one core a run may use, as quota:period (1:2, i.e. 50%).
pub const MAX_CPU_SHARE: (i64, i64) = (1, 2);

/// Parses a runtime memory size (`"512m"`, `"1g"`, `"65536"`) into bytes.
/// A bare number is bytes; suffixes `b`, `k`, `m`, `g` are binary units.
pub fn memory_bytes(value: &str) -> Option<u64> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().last()? {
        (idx, c) if c.is_ascii_alphabetic() => (&value[..idx], c.to_ascii_lowercase()),
        _ => (value, 'b'),
    };
    let scale: u64 = match unit {
        'b' => 1,
        'k' => 1024,
        'm' => 1024 * 1024,
        'g' => 1024 * 1024 * 1024,
        _ => return None,
    };
    digits.parse::<u64>().ok()?.checked_mul(scale)
}

/// True when `memory` parses and is at most [`MAX_MEMORY_BYTES`].
pub fn memory_within_cap(memory: &str) -> bool {
    matches!(memory_bytes(memory), Some(bytes) if bytes > 0 && bytes <= MAX_MEMORY_BYTES)
}

/// True when `quota / period` does not exceed [`MAX_CPU_SHARE`].
pub fn cpu_within_cap(quota: i64, period: i64) -> bool {
    let (share_quota, share_period) = MAX_CPU_SHARE;
    quota > 0
        && period > 0
        && i128::from(quota) * i128::from(share_period)
            <= i128::from(period) * i128::from(share_quota)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sizes_parse_with_binary_units() {
        assert_eq!(memory_bytes("512m"), Some(MAX_MEMORY_BYTES));
        assert_eq!(memory_bytes("1G"), Some(1024 * 1024 * 1024));
        assert_eq!(memory_bytes("65536"), Some(65536));
        assert_eq!(memory_bytes("lots"), None);
        assert_eq!(memory_bytes(""), None);
    }

    #[test]
    fn caps_allow_tighter_and_reject_looser_limits() {
        assert!(memory_within_cap("512m"));
        assert!(memory_within_cap("256m"));
        assert!(!memory_within_cap("513m"));
        assert!(!memory_within_cap("1g"));
        assert!(!memory_within_cap("0"));

        assert!(cpu_within_cap(50_000, 100_000));
        assert!(cpu_within_cap(25_000, 100_000));
        assert!(!cpu_within_cap(50_001, 100_000));
        assert!(!cpu_within_cap(200_000, 100_000));
    }
}
