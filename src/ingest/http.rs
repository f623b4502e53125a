//! HTTP camera frame source.
//!
//! `HttpSource` reads frames from network cameras (ESP32-CAM class devices)
//! that serve either a multipart MJPEG stream or a single JPEG per request.
//! JPEG frames are decoded in memory; nothing is written to disk.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::io::Read;
use std::time::{Duration, Instant};
use url::Url;

use super::{FrameSource, SourceKind, SourceStats};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// Configuration for an HTTP camera source.
#[derive(Clone, Debug)]
pub struct HttpSourceConfig {
    /// Stream URL (http or https).
    pub url: String,
    /// Bound on connecting and on each read.
    pub timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/stream".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpSource {
    config: HttpSourceConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout)
            .timeout_read(config.timeout)
            .build();
        Ok(Self {
            config,
            agent,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            last_error: None,
        })
    }

    fn read_jpeg(&mut self) -> Result<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("camera source not connected; call connect() first"))?;
        match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.agent, &self.config.url),
        }
    }
}

impl FrameSource for HttpSource {
    fn name(&self) -> String {
        self.config.url.clone()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn connect(&mut self) -> Result<()> {
        self.stream = None;
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("connect to camera stream {}", self.config.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("HttpSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let image = self
            .read_jpeg()
            .and_then(|bytes| decode_jpeg(&bytes));
        match image {
            Ok(image) => {
                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                self.last_error = None;
                Ok(Some(image))
            }
            Err(e) => {
                self.last_error = Some(format!("{e:#}"));
                Err(e)
            }
        }
    }

    fn is_healthy(&self) -> bool {
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

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }

    fn release(&mut self) {
        self.stream = None;
        self.connected_at = None;
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

/// Start and end (exclusive) of the first complete JPEG in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|pair| pair == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|pair| pair == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn jpeg_bytes() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10]))
            .write_to(&mut out, image::ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn finds_jpeg_between_multipart_headers() {
        let mut buffer = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        let offset = buffer.len();
        buffer.extend_from_slice(&[0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
        buffer.extend_from_slice(b"\r\n--frame");
        assert_eq!(find_jpeg_bounds(&buffer), Some((offset, offset + 6)));
        assert_eq!(find_jpeg_bounds(&buffer[..offset + 3]), None);
    }

    #[test]
    fn mjpeg_stream_yields_consecutive_frames() {
        let jpeg = jpeg_bytes();
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&jpeg);
            body.extend_from_slice(b"\r\n");
        }
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));
        let first = stream.read_next_jpeg().unwrap();
        assert_eq!(decode_jpeg(&first).unwrap().dimensions(), (8, 8));
        assert!(stream.read_next_jpeg().is_ok());
        assert!(stream.read_next_jpeg().is_err());
    }

    #[test]
    fn rejects_non_http_urls() {
        let config = HttpSourceConfig {
            url: "udp://0.0.0.0:5000".to_string(),
            ..HttpSourceConfig::default()
        };
        assert!(HttpSource::new(config).is_err());
    }
}
