use bytes::{BufMut, Bytes, BytesMut};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tandem_core::{AudioClip, playback::PlaybackError};

// Define standard sample rates for clarity and consistency
pub const CAPTURE_SAMPLE_RATE: u32 = 16000; // Recorded clips are sent as 16kHz mono
pub const RAW_PCM_SAMPLE_RATE: u32 = 24000; // Headerless PCM16 frames are assumed to be 24kHz

pub const WAV_MIME: &str = "audio/wav";
const RESAMPLE_CHUNK: usize = 1024;

/// Mono samples decoded from an inbound clip.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,                     // Fixed ratio, no runtime adjustment
        PolynomialDegree::Cubic, // Cubic interpolation for quality
        chunk_size,
        1, // 1 channel (mono)
    )?;
    Ok(resampler)
}

/// Resamples a whole mono buffer, including a trailing partial chunk.
pub fn resample(samples: &[f32], in_rate: u32, out_rate: u32) -> anyhow::Result<Vec<f32>> {
    if samples.is_empty() || in_rate == out_rate {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(in_rate as f64, out_rate as f64, RESAMPLE_CHUNK)?;
    let expected = (samples.len() as f64 * out_rate as f64 / in_rate as f64).ceil() as usize;
    let mut out = Vec::with_capacity(expected + RESAMPLE_CHUNK);

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let frames = resampler.process(&[&samples[pos..pos + needed]], None)?;
        out.extend_from_slice(&frames[0]);
        pos += needed;
    }
    if pos < samples.len() {
        let frames = resampler.process_partial(Some(&[&samples[pos..]]), None)?;
        out.extend_from_slice(&frames[0]);
    }
    Ok(out)
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Encodes mono samples as a 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Bytes {
    let pcm16 = convert_f32_to_i16(samples);
    let data_len = (pcm16.len() * 2) as u32;
    let mut buf = BytesMut::with_capacity(44 + data_len as usize);

    buf.put_slice(b"RIFF");
    buf.put_u32_le(36 + data_len);
    buf.put_slice(b"WAVE");
    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(1); // PCM
    buf.put_u16_le(1); // mono
    buf.put_u32_le(sample_rate);
    buf.put_u32_le(sample_rate * 2); // byte rate
    buf.put_u16_le(2); // block align
    buf.put_u16_le(16); // bits per sample
    buf.put_slice(b"data");
    buf.put_u32_le(data_len);
    for sample in pcm16 {
        buf.put_i16_le(sample);
    }
    buf.freeze()
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Decodes a 16-bit PCM WAV file, downmixing to mono.
pub fn decode_wav(data: &[u8]) -> Result<DecodedAudio, PlaybackError> {
    let malformed = |why: &str| PlaybackError::Malformed(why.to_string());
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err(malformed("missing RIFF/WAVE header"));
    }

    let mut format: Option<(u16, u16, u32, u16)> = None;
    let mut pos = 12;
    while pos + 8 <= data.len() {
        let id = &data[pos..pos + 4];
        let len = read_u32(data, pos + 4).ok_or_else(|| malformed("truncated chunk header"))? as usize;
        let body = pos + 8;
        match id {
            b"fmt " => {
                let tag = read_u16(data, body).ok_or_else(|| malformed("truncated fmt chunk"))?;
                let channels = read_u16(data, body + 2).ok_or_else(|| malformed("truncated fmt chunk"))?;
                let rate = read_u32(data, body + 4).ok_or_else(|| malformed("truncated fmt chunk"))?;
                let bits = read_u16(data, body + 14).ok_or_else(|| malformed("truncated fmt chunk"))?;
                format = Some((tag, channels, rate, bits));
            }
            b"data" => {
                let (tag, channels, sample_rate, bits) =
                    format.ok_or_else(|| malformed("data chunk before fmt chunk"))?;
                if tag != 1 || bits != 16 {
                    return Err(PlaybackError::Unsupported(format!(
                        "wav format tag {tag} with {bits} bits"
                    )));
                }
                if channels == 0 || sample_rate == 0 {
                    return Err(malformed("zero channels or sample rate"));
                }
                let end = (body + len).min(data.len());
                let pcm16: Vec<i16> = data[body..end]
                    .chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect();
                let samples = convert_i16_to_f32(&pcm16)
                    .chunks(channels as usize)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                    .collect();
                return Ok(DecodedAudio {
                    samples,
                    sample_rate,
                });
            }
            _ => {}
        }
        // Chunks are padded to an even length.
        pos = body + len + (len & 1);
    }
    Err(malformed("no data chunk"))
}

/// Decodes headerless little-endian 16-bit mono PCM.
pub fn decode_pcm16(data: &[u8]) -> DecodedAudio {
    let pcm16: Vec<i16> = data
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    DecodedAudio {
        samples: convert_i16_to_f32(&pcm16),
        sample_rate: RAW_PCM_SAMPLE_RATE,
    }
}

/// Turns an inbound clip into samples, trusting the bytes over the declared type.
pub fn decode_clip(clip: &AudioClip) -> Result<DecodedAudio, PlaybackError> {
    if clip.data.starts_with(b"RIFF") {
        return decode_wav(&clip.data);
    }
    let mime = clip.mime.to_ascii_lowercase();
    if mime.starts_with("audio/pcm") || mime.starts_with("audio/l16") {
        return Ok(decode_pcm16(&clip.data));
    }
    if mime.starts_with(WAV_MIME) || mime.starts_with("audio/x-wav") {
        return Err(PlaybackError::Malformed("declared wav without RIFF header".into()));
    }
    Err(PlaybackError::Unsupported(clip.mime.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        // Test creating a resampler with valid parameters
        let result = create_resampler(16000.0, 24000.0, 1024);
        assert!(result.is_ok());

        // Test creating a resampler with downsampling
        let result = create_resampler(48000.0, 16000.0, 1024);
        assert!(result.is_ok());
    }

    #[test]
    fn test_resample_changes_length_by_ratio() {
        let input = vec![0.25f32; 48000];
        let output = resample(&input, 48000, 16000).unwrap();
        // One second of audio stays roughly one second long.
        assert!((output.len() as i64 - 16000).abs() < 1100, "len {}", output.len());

        let same = resample(&input[..10], 16000, 16000).unwrap();
        assert_eq!(same, &input[..10]);
        assert!(resample(&[], 48000, 16000).unwrap().is_empty());
    }

    #[test]
    fn test_convert_f32_to_i16() {
        let input = vec![1.0f32, -1.0f32, 0.0f32, 0.5f32];
        let result = convert_f32_to_i16(&input);

        assert_eq!(result.len(), 4);
        assert_eq!(result[0], i16::MAX);
        // -1.0 * 32767 = -32767, not i16::MIN (-32768)
        assert_eq!(result[1], -32767);
        assert_eq!(result[2], 0);
        assert_eq!(result[3], (0.5 * i16::MAX as f32) as i16);

        // Test with values that need clamping
        let result = convert_f32_to_i16(&[2.0f32, -2.0f32]);
        assert_eq!(result[0], i16::MAX);
        assert_eq!(result[1], i16::MIN);
    }

    #[test]
    fn test_convert_i16_to_f32() {
        let input = vec![i16::MAX, i16::MIN, 0i16, 16384i16];
        let result = convert_i16_to_f32(&input);

        assert_eq!(result.len(), 4);
        assert_abs_diff_eq!(result[0], i16::MAX as f32 / 32768.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[3], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_wav_header_layout() {
        let wav = encode_wav(&[0.5, -0.5, 0.0], 16000);
        assert_eq!(wav.len(), 44 + 6);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..16], b"WAVEfmt ");
        assert_eq!(read_u32(&wav, 24), Some(16000));
        assert_eq!(read_u16(&wav, 34), Some(16));
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(read_u32(&wav, 40), Some(6));

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.samples.len(), 3);
        assert_abs_diff_eq!(decoded.samples[0], 0.5, epsilon = 0.001);
        assert_abs_diff_eq!(decoded.samples[1], -0.5, epsilon = 0.001);
    }

    #[test]
    fn test_decode_stereo_wav_downmixes() {
        let mut wav = BytesMut::new();
        wav.put_slice(b"RIFF");
        wav.put_u32_le(36 + 8);
        wav.put_slice(b"WAVEfmt ");
        wav.put_u32_le(16);
        wav.put_u16_le(1);
        wav.put_u16_le(2);
        wav.put_u32_le(24000);
        wav.put_u32_le(24000 * 4);
        wav.put_u16_le(4);
        wav.put_u16_le(16);
        wav.put_slice(b"data");
        wav.put_u32_le(8);
        for s in [16384i16, 0, -16384, -16384] {
            wav.put_i16_le(s);
        }

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.sample_rate, 24000);
        assert_eq!(decoded.samples.len(), 2);
        assert_abs_diff_eq!(decoded.samples[0], 0.25, epsilon = 0.0001);
        assert_abs_diff_eq!(decoded.samples[1], -0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_decode_wav_rejects_garbage() {
        assert!(matches!(decode_wav(b"not audio"), Err(PlaybackError::Malformed(_))));
        assert!(matches!(
            decode_wav(b"RIFF\0\0\0\0WAVEdata\0\0\0\0"),
            Err(PlaybackError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_clip_dispatch() {
        let wav = AudioClip {
            mime: "audio/mpeg".into(),
            data: encode_wav(&[0.1, 0.2], 8000),
        };
        assert_eq!(decode_clip(&wav).unwrap().sample_rate, 8000);

        let pcm = AudioClip {
            mime: "audio/pcm".into(),
            data: Bytes::from_static(&[0x00, 0x40, 0x00]),
        };
        let decoded = decode_clip(&pcm).unwrap();
        assert_eq!(decoded.sample_rate, RAW_PCM_SAMPLE_RATE);
        assert_eq!(decoded.samples.len(), 1);

        let headerless_wav = AudioClip {
            mime: WAV_MIME.into(),
            data: Bytes::from_static(b"ID3"),
        };
        assert!(matches!(decode_clip(&headerless_wav), Err(PlaybackError::Malformed(_))));

        let mp3 = AudioClip {
            mime: "audio/mpeg".into(),
            data: Bytes::from_static(b"ID3"),
        };
        assert!(matches!(decode_clip(&mp3), Err(PlaybackError::Unsupported(m)) if m == "audio/mpeg"));
    }
}
