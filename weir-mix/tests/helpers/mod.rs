//! Test infrastructure for mixer integration tests
//!
//! Provides a miniature cooperative track runtime (round-robin scheduler
//! with sticky wakes and scripted upstream producers) plus small PCM
//! conversion helpers shared by the suites.

// Each test binary uses a different subset of the helpers.
#![allow(dead_code)]

pub mod scheduler;

pub use scheduler::{run, run_passes, TestWake, Track};

/// i16 samples to little-endian bytes.
pub fn i16_bytes(vals: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vals.len() * 2);
    for v in vals {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Little-endian bytes back to i16 samples.
pub fn to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Element-wise sum of i16 streams, shorter ones zero-padded to the
/// longest. What a mixer must produce for time-aligned inputs.
pub fn summed(streams: &[Vec<i16>]) -> Vec<i16> {
    let len = streams.iter().map(|s| s.len()).max().unwrap_or(0);
    (0..len)
        .map(|i| {
            streams
                .iter()
                .map(|s| s.get(i).copied().unwrap_or(0))
                .fold(0i16, i16::saturating_add)
        })
        .collect()
}

/// Honor `RUST_LOG` when a test run needs tracing output.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
