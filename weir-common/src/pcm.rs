//! Raw PCM format descriptors and sample math
//!
//! Streams moving through a chain are plain byte buffers; this module holds
//! the descriptor that gives those bytes meaning and the handful of
//! operations the engine needs over them: frame-size arithmetic,
//! milliseconds-to-bytes conversion for buffer sizing, and the additive
//! merge used when several streams land in one buffer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample encoding of a raw PCM stream.
///
/// Integer encodings are little-endian and signed; `I24` is packed
/// (3 bytes per sample, no padding byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcmEncoding {
    I16,
    I24,
    I32,
    F32,
    F64,
}

impl PcmEncoding {
    /// Size of one sample of one channel, in bytes.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PcmEncoding::I16 => 2,
            PcmEncoding::I24 => 3,
            PcmEncoding::I32 => 4,
            PcmEncoding::F32 => 4,
            PcmEncoding::F64 => 8,
        }
    }
}

impl fmt::Display for PcmEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PcmEncoding::I16 => "i16",
            PcmEncoding::I24 => "i24",
            PcmEncoding::I32 => "i32",
            PcmEncoding::F32 => "f32",
            PcmEncoding::F64 => "f64",
        };
        f.write_str(s)
    }
}

/// Description of a raw PCM stream.
///
/// Two streams can be merged when encoding, channel count and sample rate
/// are all equal. The channel layout (`interleaved`) is deliberately not
/// part of that test: a mixer pins its own layout once, from the first
/// stream it verifies, and layout differences upstream are a conversion
/// concern, not a compatibility failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub encoding: PcmEncoding,
    pub channels: u16,
    pub rate: u32,
    /// `true` when samples alternate across channels within one plane,
    /// `false` when each channel occupies its own plane.
    pub interleaved: bool,
}

impl PcmFormat {
    /// New interleaved format descriptor.
    pub fn new(encoding: PcmEncoding, channels: u16, rate: u32) -> Self {
        Self {
            encoding,
            channels,
            rate,
            interleaved: true,
        }
    }

    /// Size of one frame (one sample across all channels), in bytes.
    pub fn frame_size(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels as usize
    }

    /// Bytes covering `ms` milliseconds of audio at this format.
    ///
    /// The result is always a whole number of frames; fractional frames are
    /// truncated.
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        let frames = u64::from(ms) * u64::from(self.rate) / 1000;
        frames as usize * self.frame_size()
    }

    /// Whether streams of `self` and `other` can be additively merged.
    ///
    /// Interleaving is exempt; see the type-level description.
    pub fn mixable_with(&self, other: &PcmFormat) -> bool {
        self.encoding == other.encoding
            && self.channels == other.channels
            && self.rate == other.rate
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}ch/{}Hz {}",
            self.encoding,
            self.channels,
            self.rate,
            if self.interleaved {
                "interleaved"
            } else {
                "planar"
            }
        )
    }
}

const I24_MIN: i32 = -(1 << 23);
const I24_MAX: i32 = (1 << 23) - 1;

#[inline]
fn i24_from_le(b: &[u8]) -> i32 {
    (i32::from(b[2] as i8) << 16) | (i32::from(b[1]) << 8) | i32::from(b[0])
}

#[inline]
fn i24_to_le(v: i32) -> [u8; 3] {
    [v as u8, (v >> 8) as u8, (v >> 16) as u8]
}

/// Additively merge `src` into `dst`, sample by sample.
///
/// Integer encodings saturate at their numeric limits instead of wrapping;
/// float encodings add without clamping (levelling is the producers'
/// business). Both slices must have equal length holding a whole number of
/// samples; callers are expected to pass frame-clamped slices.
pub fn mix_into(encoding: PcmEncoding, dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    debug_assert_eq!(dst.len() % encoding.bytes_per_sample(), 0);

    match encoding {
        PcmEncoding::I16 => {
            for (d, s) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
                let sum = i16::from_le_bytes([d[0], d[1]])
                    .saturating_add(i16::from_le_bytes([s[0], s[1]]));
                d.copy_from_slice(&sum.to_le_bytes());
            }
        }
        PcmEncoding::I24 => {
            for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
                let sum = (i24_from_le(d) + i24_from_le(s)).clamp(I24_MIN, I24_MAX);
                d.copy_from_slice(&i24_to_le(sum));
            }
        }
        PcmEncoding::I32 => {
            for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                let sum = i32::from_le_bytes([d[0], d[1], d[2], d[3]])
                    .saturating_add(i32::from_le_bytes([s[0], s[1], s[2], s[3]]));
                d.copy_from_slice(&sum.to_le_bytes());
            }
        }
        PcmEncoding::F32 => {
            for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                let sum = f32::from_le_bytes([d[0], d[1], d[2], d[3]])
                    + f32::from_le_bytes([s[0], s[1], s[2], s[3]]);
                d.copy_from_slice(&sum.to_le_bytes());
            }
        }
        PcmEncoding::F64 => {
            for (d, s) in dst.chunks_exact_mut(8).zip(src.chunks_exact(8)) {
                let a = f64::from_le_bytes([d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]]);
                let b = f64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]]);
                d.copy_from_slice(&(a + b).to_le_bytes());
            }
        }
    }
}
