// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex64;

/// Bytes per complex sample on the wire (I then Q, signed 8 bit).
pub const BYTES_PER_SAMPLE: usize = 2;

const SCALE: f64 = 127.5;

/// Convert interleaved signed 8-bit I/Q bytes into complex samples.
///
/// Each component is mapped as `v / 127.5 - 1`. The raw bytes are already
/// zero-centred, so the `-1` offset shifts every sample by `-(1 + 1j)`.
/// A trailing unpaired byte is dropped.
pub fn decode(bytes: &[u8]) -> Vec<Complex64> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| {
            let i = pair[0] as i8 as f64;
            let q = pair[1] as i8 as f64;
            Complex64::new(i / SCALE - 1.0, q / SCALE - 1.0)
        })
        .collect()
}
