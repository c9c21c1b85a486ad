//! WAV recording of the capture path.
//!
//! Recording taps the transmit task after frames leave the capture ring,
//! never the device callback. Files are 16-bit PCM; the RIFF sizes are
//! finalized when the recorder is closed.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;

use crate::error::{EndpointError, Result};

/// Writes captured audio to a 16-bit PCM WAV file.
pub struct WavRecorder {
    writer: Option<WavWriter<std::io::BufWriter<std::fs::File>>>,
    path: String,
    samples_written: u64,
}

impl WavRecorder {
    /// Create a recorder writing to `path`.
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> Result<Self> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec).map_err(|e| EndpointError::Recorder {
            reason: e.to_string(),
        })?;
        info!(path = %path.display(), sample_rate, channels, "recording started");
        Ok(Self {
            writer: Some(writer),
            path: path.display().to_string(),
            samples_written: 0,
        })
    }

    /// Append interleaved f32 samples, converted to i16 with clamping.
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| EndpointError::Recorder {
            reason: "recorder already finalized".to_string(),
        })?;
        for &sample in samples {
            let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(scaled)
                .map_err(|e| EndpointError::Recorder {
                    reason: e.to_string(),
                })?;
        }
        self.samples_written += samples.len() as u64;
        Ok(())
    }

    /// Total samples written so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// The output file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Flush and patch the RIFF header sizes.
    pub fn finalize(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| EndpointError::Recorder {
                reason: e.to_string(),
            })?;
        }
        info!(path = %self.path, samples = self.samples_written, "recording finalized");
        Ok(())
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        // Finalize on drop so an abandoned recorder still leaves a
        // readable file.
        if let Some(writer) = self.writer.take() {
            let _ = writer.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_finalizes_a_readable_wav() {
        let dir = std::env::temp_dir().join("audsync-recorder-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("capture.wav");

        let mut recorder = WavRecorder::create(&path, 44_100, 1).unwrap();
        recorder.write_samples(&[0.0, 0.5, -0.5, 1.0, -1.0]).unwrap();
        assert_eq!(recorder.samples_written(), 5);
        recorder.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[3], i16::MAX);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let dir = std::env::temp_dir().join("audsync-recorder-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("clamped.wav");

        let mut recorder = WavRecorder::create(&path, 8000, 1).unwrap();
        recorder.write_samples(&[2.0, -2.0]).unwrap();
        recorder.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX]);

        std::fs::remove_file(&path).ok();
    }
}
