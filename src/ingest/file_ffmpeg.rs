//! Local video file source using FFmpeg.
//!
//! Decodes the best video stream to RGB24 in memory. Every packet is
//! followed by a full drain of the decoder; at the end of the packets the
//! decoder gets EOF and is drained once more, so buffered tail frames are
//! delivered before end of stream is reported. `rewind` seeks back to the
//! start and flushes the decoder.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::SourceStats;

/// One step of a packet-fed decoder.
trait PacketDecoder {
    type Output;

    /// Send the next packet. Returns `false` once the packets are exhausted
    /// and EOF has been signalled instead.
    fn feed(&mut self) -> Result<bool>;

    /// Move every frame the decoder has ready into `out`.
    fn drain(&mut self, out: &mut VecDeque<Self::Output>) -> Result<()>;
}

/// Frames decoded but not yet handed out, plus the EOF state.
struct DecodeQueue<T> {
    pending: VecDeque<T>,
    finished: bool,
}

impl<T> DecodeQueue<T> {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn next<D: PacketDecoder<Output = T>>(&mut self, decoder: &mut D) -> Result<Option<T>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.finished {
                return Ok(None);
            }
            if !decoder.feed()? {
                self.finished = true;
            }
            decoder.drain(&mut self.pending)?;
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.finished = false;
    }
}

struct FfmpegDecoder {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

impl PacketDecoder for FfmpegDecoder {
    type Output = RgbImage;

    fn feed(&mut self) -> Result<bool> {
        let stream_index = self.stream_index;
        let packet = self
            .input
            .packets()
            .find_map(|(stream, packet)| (stream.index() == stream_index).then_some(packet));
        match packet {
            Some(packet) => {
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                Ok(true)
            }
            None => {
                self.decoder.send_eof().context("send eof to ffmpeg decoder")?;
                Ok(false)
            }
        }
    }

    fn drain(&mut self, out: &mut VecDeque<RgbImage>) -> Result<()> {
        let mut decoded = ffmpeg::frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgb_frame = ffmpeg::frame::Video::empty();
            self.scaler
                .run(&decoded, &mut rgb_frame)
                .context("scale frame to RGB")?;
            out.push_back(frame_to_image(&rgb_frame)?);
        }
        Ok(())
    }
}

pub(crate) struct FfmpegFileSource {
    path: String,
    decoder: FfmpegDecoder,
    queue: DecodeQueue<RgbImage>,
    fps: Option<f32>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let fps = (rate.denominator() != 0)
            .then(|| rate.numerator() as f32 / rate.denominator() as f32);
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            path: path.to_string(),
            decoder: FfmpegDecoder {
                input,
                stream_index,
                decoder,
                scaler,
            },
            queue: DecodeQueue::new(),
            fps,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("FileSource: connected to {} (ffmpeg)", self.path);
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.queue.next(&mut self.decoder) {
            Ok(Some(image)) => {
                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                self.last_error = None;
                Ok(Some(image))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.last_error = Some(format!("{e:#}"));
                Err(e)
            }
        }
    }

    pub(crate) fn rewind(&mut self) -> Result<()> {
        self.decoder
            .input
            .seek(0, ..)
            .with_context(|| format!("seek {} to start", self.path))?;
        self.decoder.decoder.flush();
        self.queue.reset();
        Ok(())
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= Duration::from_secs(2)
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.clone(),
        }
    }

    pub(crate) fn nominal_fps(&self) -> Option<f32> {
        self.fps
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    RgbImage::from_raw(width, height, pixels).ok_or_else(|| anyhow!("ffmpeg frame size mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Holds back `delay` frames until EOF, like a decoder with reordering.
    struct Delayed {
        packets: VecDeque<u32>,
        buffered: VecDeque<u32>,
        delay: usize,
        eof: bool,
    }

    impl PacketDecoder for Delayed {
        type Output = u32;

        fn feed(&mut self) -> Result<bool> {
            match self.packets.pop_front() {
                Some(packet) => {
                    self.buffered.push_back(packet);
                    Ok(true)
                }
                None => {
                    self.eof = true;
                    Ok(false)
                }
            }
        }

        fn drain(&mut self, out: &mut VecDeque<u32>) -> Result<()> {
            let keep = if self.eof { 0 } else { self.delay };
            while self.buffered.len() > keep {
                if let Some(frame) = self.buffered.pop_front() {
                    out.push_back(frame);
                }
            }
            Ok(())
        }
    }

    fn delayed(frames: u32, delay: usize) -> Delayed {
        Delayed {
            packets: (1..=frames).collect(),
            buffered: VecDeque::new(),
            delay,
            eof: false,
        }
    }

    #[test]
    fn delivers_buffered_tail_frames_before_end() {
        let mut decoder = delayed(5, 2);
        let mut queue = DecodeQueue::new();
        let mut seen = Vec::new();
        while let Some(frame) = queue.next(&mut decoder).unwrap() {
            seen.push(frame);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert!(queue.next(&mut decoder).unwrap().is_none());
    }

    #[test]
    fn reset_allows_a_second_pass() {
        let mut decoder = delayed(2, 1);
        let mut queue = DecodeQueue::new();
        assert_eq!(queue.next(&mut decoder).unwrap(), Some(1));
        assert_eq!(queue.next(&mut decoder).unwrap(), Some(2));
        assert_eq!(queue.next(&mut decoder).unwrap(), None);

        queue.reset();
        decoder = delayed(2, 1);
        assert_eq!(queue.next(&mut decoder).unwrap(), Some(1));
    }
}
