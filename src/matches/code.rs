// Short shareable match codes.

use rand::Rng;

/// Length of a generated match code.
pub const CODE_LEN: usize = 8;

/// Upper-case letters and digits, minus the look-alikes 0/O and 1/I.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a random match code.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Canonical form used for lookups: trimmed and upper-cased.
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Whether a path segment has the shape of a match code.
pub fn looks_like_code(segment: &str) -> bool {
    segment.len() == CODE_LEN && segment.bytes().all(|b| ALPHABET.contains(&b))
}
