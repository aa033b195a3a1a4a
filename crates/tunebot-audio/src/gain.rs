//! Linear volume applied to PCM frames on their way to the voice sink.

use tunebot_core::{Frame, Volume};

/// Scale every sample by the volume's linear gain, saturating at the i16 range.
pub fn apply(frame: &mut Frame, volume: Volume) {
    if volume == Volume::MAX {
        return;
    }

    let gain = volume.gain();
    for sample in frame.samples_mut() {
        *sample = (f32::from(*sample) * gain)
            .round()
            .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_volume_is_identity() {
        let mut frame = Frame::from_samples(vec![i16::MAX, i16::MIN, 123]);
        apply(&mut frame, Volume::MAX);
        assert_eq!(&frame.samples()[..3], &[i16::MAX, i16::MIN, 123]);
    }

    #[test]
    fn test_half_volume() {
        let mut frame = Frame::from_samples(vec![1000, -1000, 3]);
        apply(&mut frame, Volume::clamped(50));
        assert_eq!(&frame.samples()[..3], &[500, -500, 2]);
    }

    #[test]
    fn test_mute() {
        let mut frame = Frame::from_samples(vec![i16::MAX; 4]);
        apply(&mut frame, Volume::MIN);
        assert!(frame.samples().iter().all(|s| *s == 0));
    }
}
