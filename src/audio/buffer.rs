use rodio::{Decoder, Source};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

pub const SILENCE_SAMPLE_RATE: u32 = 44100;

/// A fully decoded sound held in memory as interleaved `f32` samples.
/// Cloning shares the samples.
#[derive(Debug, Clone)]
pub struct DecodedSound {
    channels: u16,
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl DecodedSound {
    pub fn new(channels: u16, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            channels,
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Mono zero-amplitude buffer of the given length.
    pub fn silence(length: Duration, sample_rate: u32) -> Self {
        let frames = (length.as_secs_f64() * sample_rate as f64).round() as usize;
        Self::new(1, sample_rate, vec![0.0; frames])
    }

    /// Decodes any container rodio understands (mp3, wav, ogg, flac).
    pub fn decode(bytes: Vec<u8>) -> Result<Self, String> {
        let decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let samples: Vec<f32> = decoder.convert_samples().collect();

        if samples.is_empty() || channels == 0 || sample_rate == 0 {
            return Err("decoded audio is empty".to_string());
        }

        Ok(Self::new(channels, sample_rate, samples))
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as f64 / self.channels.max(1) as f64;
        Duration::from_secs_f64(frames / self.sample_rate.max(1) as f64)
    }

    pub fn source(&self) -> BufferSource {
        BufferSource {
            sound: self.clone(),
            position: 0,
        }
    }
}

/// Plays a [`DecodedSound`] from the start without copying its samples.
pub struct BufferSource {
    sound: DecodedSound,
    position: usize,
}

impl Iterator for BufferSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.sound.samples.get(self.position).copied()?;
        self.position += 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sound.samples.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl Source for BufferSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.sound.samples.len().saturating_sub(self.position))
    }

    fn channels(&self) -> u16 {
        self.sound.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sound.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(self.sound.duration())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::wav_bytes;
    use super::*;

    #[test]
    fn silence_has_requested_length_and_no_signal() {
        let silence = DecodedSound::silence(Duration::from_secs(10), SILENCE_SAMPLE_RATE);
        assert_eq!(silence.channels(), 1);
        assert_eq!(silence.len(), 441_000);
        assert_eq!(silence.duration(), Duration::from_secs(10));
        assert!(silence.source().all(|s| s == 0.0));
    }

    #[test]
    fn decodes_wav_into_interleaved_samples() {
        let samples: Vec<i16> = (0..8000).map(|i| (i % 100) as i16 * 100).collect();
        let sound = DecodedSound::decode(wav_bytes(2, 8000, &samples)).unwrap();

        assert_eq!(sound.channels(), 2);
        assert_eq!(sound.sample_rate(), 8000);
        assert_eq!(sound.len(), 8000);
        assert_eq!(sound.duration(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_garbage_and_empty_audio() {
        assert!(DecodedSound::decode(b"definitely not audio".to_vec()).is_err());
        assert!(DecodedSound::decode(wav_bytes(1, 8000, &[])).is_err());
    }

    #[test]
    fn source_reports_shape_and_plays_every_sample() {
        let sound = DecodedSound::new(2, 22050, vec![0.5; 10]);
        let source = sound.source();
        assert_eq!(Source::channels(&source), 2);
        assert_eq!(Source::sample_rate(&source), 22050);
        assert_eq!(source.count(), 10);
    }
}
