//! Content fingerprints for circuits and artifacts.

/// Compute a content fingerprint using fast non-cryptographic hashes.
///
/// DJB2a and FNV-1a are run side by side and concatenated into a
/// 32-character hex string. Not cryptographic; used for audit correlation.
pub fn content_fingerprint(bytes: &[u8]) -> String {
    let mut h1: u64 = 5381;
    let mut h2: u64 = 0xcbf2_9ce4_8422_2325;

    for &b in bytes {
        h1 = h1.wrapping_mul(33) ^ u64::from(b);
        h2 ^= u64::from(b);
        h2 = h2.wrapping_mul(0x0100_0000_01b3);
    }

    format!("{h1:016x}{h2:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = content_fingerprint(b"ry(0.5) q0;");
        let b = content_fingerprint(b"ry(0.5) q0;");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_fingerprint_differs_on_content() {
        assert_ne!(content_fingerprint(b"x q0;"), content_fingerprint(b"x q1;"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            content_fingerprint(b""),
            format!("{:016x}{:016x}", 5381u64, 0xcbf2_9ce4_8422_2325u64)
        );
    }
}
