//! Mix group configuration

use serde::{Deserialize, Serialize};
use weir_common::{Error, PcmEncoding, PcmFormat, Result};

/// Configuration of one mix group.
///
/// The defaults describe the classic target: 16-bit stereo at 44.1 kHz
/// with one second of mixed audio per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MixerConfig {
    pub encoding: PcmEncoding,
    pub channels: u16,
    pub rate: u32,
    /// Cycle buffer length, in milliseconds of audio.
    pub buffer_ms: u32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            encoding: PcmEncoding::I16,
            channels: 2,
            rate: 44100,
            buffer_ms: 1000,
        }
    }
}

impl MixerConfig {
    /// Reject configurations no engine can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(Error::Config("channels must not be zero".to_string()));
        }
        if self.rate == 0 {
            return Err(Error::Config("rate must not be zero".to_string()));
        }
        if self.buffer_ms == 0 {
            return Err(Error::Config("buffer_ms must not be zero".to_string()));
        }
        if self.format().bytes_for_ms(self.buffer_ms) == 0 {
            return Err(Error::Config(
                "buffer covers less than one frame".to_string(),
            ));
        }
        Ok(())
    }

    /// The canonical mix format, in its interleaved form.
    pub fn format(&self) -> PcmFormat {
        PcmFormat::new(self.encoding, self.channels, self.rate)
    }

    /// Size of one cycle buffer in bytes. Always a whole number of frames.
    pub fn cycle_bytes(&self) -> usize {
        self.format().bytes_for_ms(self.buffer_ms)
    }

    /// Parse and validate a TOML fragment, e.g.
    ///
    /// ```toml
    /// encoding = "i16"
    /// channels = 2
    /// rate = 44100
    /// buffer_ms = 1000
    /// ```
    ///
    /// Omitted keys take their defaults; unknown keys are rejected.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: MixerConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
