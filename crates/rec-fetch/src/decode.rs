//! Streaming decode stage.
//!
//! Uses Symphonia to:
//! - probe the container/codec from the bootstrap window
//! - decode packets into interleaved `f32` batches on the track's decode thread
//!
//! Input arrives through a [`FeedReader`], a non-seekable [`MediaSource`] that asks the network
//! side for more bytes over the credit link whenever its buffer runs dry.

use std::io::{self, Read, Seek, SeekFrom};

use rec_fetch_types::StreamInfo;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::PipelineError;
use crate::pipeline::credit::{CreditReceiver, Feed};

/// A run of decoded, interleaved samples.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBatch {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl FrameBatch {
    pub fn frames(&self) -> u64 {
        if self.channels == 0 {
            return 0;
        }
        (self.samples.len() / self.channels as usize) as u64
    }
}

/// Opens a demuxed, decodable stream from buffered bytes.
pub trait Decoder: Send + Sync {
    /// Probe the container using the bytes already held by `reader`.
    ///
    /// Runs on the lane thread while the credit link is still disarmed: reading past the
    /// bootstrap window fails instead of blocking.
    fn open_from_buffer(&self, reader: FeedReader) -> Result<Box<dyn Container>, PipelineError>;
}

/// An opened stream. Dropping it releases the decoder state.
pub trait Container: Send {
    fn stream_info(&self) -> StreamInfo;

    /// Decode the next batch, pulling more input as needed. `Ok(None)` after end of input.
    fn next_batch(&mut self) -> Result<Option<FrameBatch>, PipelineError>;
}

/// Decoder-side view of one track's byte stream.
pub struct FeedReader {
    buf: Vec<u8>,
    pos: usize,
    ended: bool,
    consumed: u64,
    feeds: u64,
    receiver: CreditReceiver,
}

impl FeedReader {
    /// `ended` is set when the session reached end of stream while bootstrapping.
    pub fn new(bootstrap: Vec<u8>, ended: bool, receiver: CreditReceiver) -> Self {
        Self {
            buf: bootstrap,
            pos: 0,
            ended,
            consumed: 0,
            feeds: 0,
            receiver,
        }
    }

    /// Bytes held but not yet read.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// True once the end marker has been received.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Number of deliveries received over the credit link.
    pub fn feeds_received(&self) -> u64 {
        self.feeds
    }

    pub fn pending_feeds(&self) -> usize {
        self.receiver.pending()
    }
}

impl Read for FeedReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            let available = self.buf.len() - self.pos;
            if available > 0 {
                let n = available.min(out.len());
                out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
                self.pos += n;
                self.consumed += n as u64;
                return Ok(n);
            }
            if self.ended {
                return Ok(0);
            }
            match self.receiver.need_more()? {
                Feed::Chunk(bytes) => self.buf = bytes,
                Feed::End(bytes) => {
                    self.buf = bytes;
                    self.ended = true;
                }
            }
            self.pos = 0;
            self.feeds += 1;
        }
    }
}

impl Seek for FeedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.consumed),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "track stream is not seekable",
            )),
        }
    }
}

impl MediaSource for FeedReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Symphonia-backed [`Decoder`]. Recordings are Ogg by default.
#[derive(Clone, Debug)]
pub struct SymphoniaDecoder {
    hint_extension: Option<String>,
}

impl Default for SymphoniaDecoder {
    fn default() -> Self {
        Self {
            hint_extension: Some("ogg".to_string()),
        }
    }
}

impl SymphoniaDecoder {
    pub fn with_hint(extension: impl Into<String>) -> Self {
        Self {
            hint_extension: Some(extension.into()),
        }
    }
}

impl Decoder for SymphoniaDecoder {
    fn open_from_buffer(&self, reader: FeedReader) -> Result<Box<dyn Container>, PipelineError> {
        if reader.is_ended() && reader.buffered().is_empty() {
            tracing::debug!("empty stream; nothing to probe");
            return Ok(Box::new(EmptyContainer));
        }

        let mut hint = Hint::new();
        if let Some(ext) = &self.hint_extension {
            hint.with_extension(ext);
        }
        let mss = MediaSourceStream::new(Box::new(reader), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| PipelineError::DecodeInit(e.to_string()))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| PipelineError::DecodeInit("no default audio track".to_string()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let decoder = make_codec(&codec_params).map_err(PipelineError::DecodeInit)?;
        let info = stream_info_from_codec_params(&codec_params);
        tracing::debug!(
            codec = %info.codec,
            rate = ?info.sample_rate,
            channels = ?info.channels,
            "stream probed"
        );

        Ok(Box::new(SymphoniaContainer {
            format,
            decoder,
            track_id,
            info,
        }))
    }
}

struct SymphoniaContainer {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    info: StreamInfo,
}

impl Container for SymphoniaContainer {
    fn stream_info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn next_batch(&mut self) -> Result<Option<FrameBatch>, PipelineError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.reset()?;
                    continue;
                }
                Err(e) => return Err(PipelineError::Decode(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(error = e, "skipping corrupt packet");
                    continue;
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => return Err(PipelineError::Decode(e.to_string())),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            return Ok(Some(FrameBatch {
                samples: sample_buf.samples().to_vec(),
                channels: spec.channels.count() as u16,
                sample_rate: spec.rate,
            }));
        }
    }
}

impl SymphoniaContainer {
    /// Chained streams: pick up the new default track and rebuild the codec.
    fn reset(&mut self) -> Result<(), PipelineError> {
        let track = self
            .format
            .default_track()
            .ok_or_else(|| PipelineError::Decode("stream reset without a track".to_string()))?;
        self.track_id = track.id;
        self.decoder = make_codec(&track.codec_params).map_err(PipelineError::Decode)?;
        tracing::debug!(track_id = self.track_id, "decoder reset");
        Ok(())
    }
}

/// Stands in for a track that closed without sending any data.
struct EmptyContainer;

impl Container for EmptyContainer {
    fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            codec: "none".to_string(),
            ..StreamInfo::default()
        }
    }

    fn next_batch(&mut self) -> Result<Option<FrameBatch>, PipelineError> {
        Ok(None)
    }
}

fn make_codec(
    codec_params: &CodecParameters,
) -> Result<Box<dyn symphonia::core::codecs::Decoder>, String> {
    symphonia::default::get_codecs()
        .make(codec_params, &DecoderOptions::default())
        .map_err(|e| e.to_string())
}

fn stream_info_from_codec_params(codec_params: &CodecParameters) -> StreamInfo {
    let codec = symphonia::default::get_codecs()
        .get_codec(codec_params.codec)
        .map(|d| d.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    StreamInfo {
        codec,
        sample_rate: codec_params.sample_rate,
        channels: codec_params.channels.map(|c| c.count() as u16),
        n_frames: codec_params.n_frames,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::credit::{Signal, link};

    /// Minimal 16-bit mono PCM WAV.
    fn wav_fixture(rate: u32, frames: u32) -> Vec<u8> {
        let data_len = frames * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for i in 0..frames {
            let sample = ((i % 64) as i16 - 32) * 512;
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    #[test]
    fn reader_serves_bootstrap_then_eof_when_ended() {
        let (_sender, receiver) = link();
        let mut reader = FeedReader::new(b"abc".to_vec(), true, receiver);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read");
        assert_eq!(out, b"abc");
        assert_eq!(reader.seek(SeekFrom::Current(0)).expect("tell"), 3);
        assert!(reader.seek(SeekFrom::Start(0)).is_err());
        assert!(!reader.is_seekable());
    }

    #[test]
    fn disarmed_reader_fails_past_the_window() {
        let (_sender, receiver) = link();
        let mut reader = FeedReader::new(vec![1, 2], false, receiver);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).expect("buffered"), 2);
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn armed_reader_pulls_feeds_on_demand() {
        let (sender, receiver) = link();
        sender.arm();
        let completion = receiver.completion();
        let mut reader = FeedReader::new(vec![1], false, receiver);
        let network = std::thread::spawn(move || {
            let Signal::NeedMore(credit) = sender.wait() else {
                panic!("expected credit");
            };
            let Signal::NeedMore(credit) = sender.deliver(credit, Feed::Chunk(vec![2, 3])) else {
                panic!("expected second credit");
            };
            let completion = sender.deliver(credit, Feed::End(vec![4]));
            assert!(matches!(completion, Signal::Finished(Ok(()))));
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read all");
        assert_eq!(out, vec![1, 2, 3, 4]);
        assert_eq!(reader.feeds_received(), 2);
        assert!(reader.is_ended());
        completion.finish(Ok(()));
        network.join().expect("network");
    }

    #[test]
    fn empty_ended_input_opens_an_empty_container() {
        let (_sender, receiver) = link();
        let reader = FeedReader::new(Vec::new(), true, receiver);
        let mut container = SymphoniaDecoder::default()
            .open_from_buffer(reader)
            .expect("empty container");
        assert_eq!(container.stream_info().codec, "none");
        assert_eq!(container.next_batch().expect("batch"), None);
    }

    #[test]
    fn garbage_fails_decoder_init() {
        let (_sender, receiver) = link();
        let reader = FeedReader::new(vec![0x5a; 4096], true, receiver);
        let result = SymphoniaDecoder::default().open_from_buffer(reader);
        assert!(matches!(result, Err(PipelineError::DecodeInit(_))));
    }

    #[test]
    fn decodes_wav_from_the_bootstrap_window() {
        let (_sender, receiver) = link();
        let reader = FeedReader::new(wav_fixture(8_000, 4_000), true, receiver);
        let mut container = SymphoniaDecoder::with_hint("wav")
            .open_from_buffer(reader)
            .expect("open wav");
        let info = container.stream_info();
        assert_eq!(info.sample_rate, Some(8_000));
        assert_eq!(info.channels, Some(1));

        let mut frames = 0;
        while let Some(batch) = container.next_batch().expect("decode") {
            assert_eq!(batch.channels, 1);
            assert_eq!(batch.sample_rate, 8_000);
            frames += batch.frames();
        }
        assert_eq!(frames, 4_000);
    }
}
