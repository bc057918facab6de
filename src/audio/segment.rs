//! Encoding helpers for turning an in-memory `AudioSegment` into a file on disk.
//!
//! WAV is used as the lossless intermediate form (via `hound`); persisted
//! reply audio is written as MP3 (via `mp3lame-encoder`, the only real
//! MP3-encoding crate found anywhere in the reference corpus — everything
//! else that touches MP3 there, `symphonia`, only decodes).

use std::path::Path;

use mp3lame_encoder::{Builder, FlushNoGap, MonoPcm};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::model::AudioSegment;

/// Write a segment to disk as 16-bit PCM WAV.
pub fn write_wav(segment: &AudioSegment, path: &Path) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: segment.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(|e| EngineError::AudioDecode(e.to_string()))?;
    for &sample in segment.samples() {
        writer.write_sample(sample).map_err(|e| EngineError::AudioDecode(e.to_string()))?;
    }
    writer.finalize().map_err(|e| EngineError::AudioDecode(e.to_string()))?;
    Ok(())
}

/// Encode a segment to MP3 and write it to `path`.
pub fn write_mp3(segment: &AudioSegment, path: &Path) -> Result<()> {
    let mut builder = Builder::new().ok_or_else(|| EngineError::AudioDecode("failed to init lame encoder".into()))?;
    builder.set_num_channels(1).map_err(|e| EngineError::AudioDecode(e.to_string()))?;
    builder.set_sample_rate(segment.sample_rate()).map_err(|e| EngineError::AudioDecode(e.to_string()))?;
    builder.set_quality(mp3lame_encoder::Quality::Best).map_err(|e| EngineError::AudioDecode(e.to_string()))?;
    let mut encoder = builder.build().map_err(|e| EngineError::AudioDecode(e.to_string()))?;

    let input = MonoPcm(segment.samples());
    let mut mp3_out = Vec::with_capacity(segment.samples().len() / 2);
    mp3_out.reserve(mp3lame_encoder::max_required_buffer_size(segment.samples().len()));
    let encoded = encoder.encode(input, mp3_out.spare_capacity_mut()).map_err(|e| EngineError::AudioDecode(e.to_string()))?;
    unsafe { mp3_out.set_len(encoded) };

    let flushed = encoder
        .flush::<FlushNoGap>(mp3_out.spare_capacity_mut())
        .map_err(|e| EngineError::AudioDecode(e.to_string()))?;
    unsafe { mp3_out.set_len(mp3_out.len() + flushed) };

    std::fs::write(path, &mp3_out)?;
    debug!(bytes = mp3_out.len(), path = %path.display(), "wrote mp3");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AudioSegment;

    #[test]
    fn write_wav_roundtrips_sample_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let segment = AudioSegment::from_samples(vec![0i16; 16000], 16000);
        write_wav(&segment, &path).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 16000);
    }
}
