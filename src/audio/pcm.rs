use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

use crate::error::DecodeError;

/// A contiguous buffer of f32 samples at a known rate.
///
/// Capture frames are always mono; playback frames are mono in practice but
/// the channel count is carried so decode stays honest about frame length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Wall-clock length of this frame. Drives playback scheduling.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        let frames = self.samples.len() / self.channels.max(1) as usize;
        frames as f64 / self.sample_rate as f64
    }
}

/// The wire unit: a base64 payload plus its mime tag. Immutable once built;
/// ownership transfers to the transport on send.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub mime_type: String,
    pub data: String,
}

impl EncodedChunk {
    pub fn pcm(rate: u32, data: String) -> Self {
        Self {
            mime_type: format!("audio/pcm;rate={}", rate),
            data,
        }
    }

    pub fn jpeg(data: String) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            data,
        }
    }

    pub fn is_pcm(&self) -> bool {
        self.mime_type.starts_with("audio/pcm")
    }
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(B64.decode(data)?)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Interpret bytes as signed 16-bit little-endian samples normalized to
/// [-1.0, 1.0]. A trailing partial sample is truncated silently.
pub fn bytes_to_frame(bytes: &[u8], sample_rate: u32, channels: u16) -> AudioFrame {
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        let v = i16::from_le_bytes([pair[0], pair[1]]);
        samples.push(v as f32 / 32768.0);
    }
    AudioFrame {
        samples,
        sample_rate,
        channels,
    }
}

/// Box-filter downsample. Identity when the rates match.
///
/// Window i covers input samples floor(i*ratio)..floor((i+1)*ratio) and is
/// replaced by its mean; an empty window (tail rounding) falls back to the
/// single sample at the window start.
pub fn downsample(frame: &AudioFrame, input_rate: u32, output_rate: u32) -> AudioFrame {
    if input_rate == output_rate {
        return frame.clone();
    }

    let ratio = input_rate as f64 / output_rate as f64;
    let out_len = (frame.samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let start = (i as f64 * ratio).floor() as usize;
        let end = (((i + 1) as f64) * ratio).floor() as usize;
        let end = end.min(frame.samples.len());

        if end > start {
            let sum: f32 = frame.samples[start..end].iter().sum();
            out.push(sum / (end - start) as f32);
        } else if start < frame.samples.len() {
            out.push(frame.samples[start]);
        }
    }

    AudioFrame {
        samples: out,
        sample_rate: output_rate,
        channels: frame.channels,
    }
}

/// Clamp to [-1, 1] and quantize to signed 16-bit little-endian bytes.
/// Negative values scale by 32768, non-negative by 32767, so the full i16
/// range is reachable without overflow.
pub fn encode_pcm16(frame: &AudioFrame) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
    for &s in &frame.samples {
        let s = s.clamp(-1.0, 1.0);
        let v = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode one inbound chunk to a frame at the fixed service output rate.
pub fn decode_chunk(chunk: &EncodedChunk, sample_rate: u32) -> Result<AudioFrame, DecodeError> {
    if !chunk.is_pcm() {
        return Err(DecodeError::MimeType(chunk.mime_type.clone()));
    }
    let bytes = decode_base64(&chunk.data)?;
    Ok(bytes_to_frame(&bytes, sample_rate, 1))
}
