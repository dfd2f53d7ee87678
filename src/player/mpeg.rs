//! Minimal MPEG audio frame sync/length parsing plus a thin wrapper over
//! `symphonia`'s MP3 decoder. The raw byte stream has no container, so we
//! find frame boundaries ourselves (the way the vendor's mp3dec integration
//! does) and hand exactly one frame's bytes to the decoder at a time.

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_MP3};
use symphonia::core::formats::Packet;

const MPEG1_BITRATES_L3: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];
const MPEG2_BITRATES_L3: [u32; 16] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0,
];
const MPEG1_SAMPLE_RATES: [u32; 4] = [44100, 48000, 32000, 0];
const MPEG2_SAMPLE_RATES: [u32; 4] = [22050, 24000, 16000, 0];

struct FrameHeader {
    len: usize,
    sample_rate: u32,
    channels: u8,
}

/// Attempt to parse an MPEG-1/2 Layer III frame header at `buf[0..4]`.
fn parse_header(buf: &[u8]) -> Option<FrameHeader> {
    if buf.len() < 4 {
        return None;
    }
    if buf[0] != 0xFF || (buf[1] & 0xE0) != 0xE0 {
        return None;
    }
    let version_bits = (buf[1] >> 3) & 0x03;
    let layer_bits = (buf[1] >> 1) & 0x03;
    if layer_bits != 0b01 {
        // Only Layer III is supported — the agent adapter only ever sends
        // Layer III streams.
        return None;
    }
    let bitrate_idx = ((buf[2] >> 4) & 0x0F) as usize;
    let samplerate_idx = ((buf[2] >> 2) & 0x03) as usize;
    let padding = (buf[2] >> 1) & 0x01;
    if bitrate_idx == 0 || bitrate_idx == 15 || samplerate_idx == 3 {
        return None;
    }
    let channel_mode = (buf[3] >> 6) & 0x03;
    let channels = if channel_mode == 0b11 { 1 } else { 2 };

    let (bitrate_kbps, sample_rate) = match version_bits {
        0b11 => (MPEG1_BITRATES_L3[bitrate_idx], MPEG1_SAMPLE_RATES[samplerate_idx]),
        0b10 | 0b00 => (MPEG2_BITRATES_L3[bitrate_idx], MPEG2_SAMPLE_RATES[samplerate_idx]),
        _ => return None,
    };
    if bitrate_kbps == 0 || sample_rate == 0 {
        return None;
    }

    let len = (144 * bitrate_kbps * 1000 / sample_rate) as usize + padding as usize;
    Some(FrameHeader { len, sample_rate, channels })
}

pub enum DecodeOutcome {
    /// A full frame was decoded; `consumed` bytes should be dropped from the
    /// front of the main buffer.
    Frame { consumed: usize, pcm: Vec<i16> },
    /// A header was found but the frame isn't fully buffered yet — wait for
    /// more data without discarding anything.
    NeedMoreData,
    /// No valid sync word in the buffered bytes — the caller should discard
    /// and resync.
    Invalid,
}

pub struct FrameDecoder {
    decoder: Option<Box<dyn Decoder>>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { decoder: None }
    }

    pub fn reset(&mut self) {
        self.decoder = None;
    }

    fn ensure_decoder(&mut self) -> std::result::Result<&mut Box<dyn Decoder>, String> {
        if self.decoder.is_none() {
            let params = CodecParameters {
                codec: CODEC_TYPE_MP3,
                ..Default::default()
            };
            let decoder = symphonia::default::get_codecs()
                .make(&params, &DecoderOptions::default())
                .map_err(|e| e.to_string())?;
            self.decoder = Some(decoder);
        }
        Ok(self.decoder.as_mut().unwrap())
    }

    pub fn decode_one(&mut self, buf: &[u8]) -> DecodeOutcome {
        // Find the first sync candidate within the buffer.
        let mut pos = 0;
        while pos + 4 <= buf.len() {
            if buf[pos] == 0xFF && (buf[pos + 1] & 0xE0) == 0xE0 {
                break;
            }
            pos += 1;
        }
        if pos + 4 > buf.len() {
            return DecodeOutcome::NeedMoreData;
        }

        let header = match parse_header(&buf[pos..]) {
            Some(h) => h,
            None => return DecodeOutcome::Invalid,
        };

        if pos + header.len > buf.len() {
            return DecodeOutcome::NeedMoreData;
        }

        let frame_bytes = &buf[pos..pos + header.len];
        let packet = Packet::new_from_slice(0, 0, 0, frame_bytes);

        let decoder = match self.ensure_decoder() {
            Ok(d) => d,
            Err(_) => return DecodeOutcome::Invalid,
        };

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let pcm = interleave_i16(&decoded, header.channels);
                DecodeOutcome::Frame { consumed: pos + header.len, pcm }
            }
            Err(_) => DecodeOutcome::Invalid,
        }
    }
}

fn interleave_i16(decoded: &AudioBufferRef, channels: u8) -> Vec<i16> {
    match decoded {
        AudioBufferRef::F32(buf) => {
            let ch = channels.max(1) as usize;
            let frames = buf.frames();
            let mut out = Vec::with_capacity(frames * ch);
            for i in 0..frames {
                for c in 0..ch.min(buf.spec().channels.count()) {
                    let sample = buf.chan(c)[i];
                    out.push((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                }
            }
            out
        }
        AudioBufferRef::S16(buf) => {
            let ch = channels.max(1) as usize;
            let frames = buf.frames();
            let mut out = Vec::with_capacity(frames * ch);
            for i in 0..frames {
                for c in 0..ch.min(buf.spec().channels.count()) {
                    out.push(buf.chan(c)[i]);
                }
            }
            out
        }
        _ => Vec::new(),
    }
}
