//! Fixed-format PCM frames delivered to the voice sink.

/// Output sample rate in Hz.
pub const SAMPLE_RATE: u32 = 48_000;

/// Output channel count (interleaved stereo).
pub const CHANNELS: u16 = 2;

/// Interleaved samples per frame (20 ms at 48 kHz stereo).
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize / 50) * CHANNELS as usize;

/// Bytes per frame as signed 16-bit little-endian PCM.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// 20 ms of interleaved 48 kHz stereo s16 PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    samples: Vec<i16>,
}

impl Frame {
    /// Build a frame from interleaved samples, zero-padding a short tail.
    pub fn from_samples(mut samples: Vec<i16>) -> Self {
        samples.resize(FRAME_SAMPLES, 0);
        Self { samples }
    }

    /// A frame of digital silence.
    pub fn silence() -> Self {
        Self {
            samples: vec![0; FRAME_SAMPLES],
        }
    }

    /// Decode s16le bytes. Trailing odd bytes are ignored and the frame is
    /// zero-padded to full length.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::from_samples(samples)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Encode as s16le bytes for the wire.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_geometry() {
        assert_eq!(FRAME_SAMPLES, 1920);
        assert_eq!(FRAME_BYTES, 3840);
    }

    #[test]
    fn test_from_le_bytes_pads_short_tail() {
        let frame = Frame::from_le_bytes(&[0x01, 0x00, 0xFF, 0x7F, 0xAA]);
        assert_eq!(frame.samples().len(), FRAME_SAMPLES);
        assert_eq!(frame.samples()[0], 1);
        assert_eq!(frame.samples()[1], i16::MAX);
        assert_eq!(frame.samples()[2], 0);
    }

    #[test]
    fn test_le_bytes_length() {
        assert_eq!(Frame::silence().to_le_bytes().len(), FRAME_BYTES);
    }
}
