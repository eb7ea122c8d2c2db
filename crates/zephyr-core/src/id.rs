//! Opaque id generation for requests, connections, and sessions

use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a 21-character NanoID-style identifier
pub fn generate_id() -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";
    let mut bytes = [0u8; 21];
    fill_random(&mut bytes);

    bytes
        .iter()
        .map(|&b| ALPHABET[(b as usize) % ALPHABET.len()] as char)
        .collect()
}

/// Fill buffer with pseudo-random bytes
///
/// Time-seeded xorshift64 mixed with a process-wide sequence counter so
/// consecutive calls within one clock tick still diverge.
fn fill_random(buf: &mut [u8]) {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let mut seed = (now.as_nanos() as u64)
        ^ SEQUENCE
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15);
    if seed == 0 {
        // xorshift is a fixed point at zero
        seed = 0x9E37_79B9_7F4A_7C15;
    }

    for byte in buf.iter_mut() {
        // xorshift64
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        *byte = (seed & 0xff) as u8;
    }
}
