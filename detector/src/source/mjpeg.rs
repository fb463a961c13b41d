use bytes::BytesMut;
use chrono::Utc;
use futures_util::StreamExt;
use radiograph_common::frame::LumaFrame;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{decode_luma, deliver, SourceError};
use crate::intake::{Mailbox, PostOutcome};
use crate::stats::PipelineStats;

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` MJPEG bodies.
/// Feed it chunks as they arrive; it hands back every complete JPEG part.
pub struct MjpegSplitter {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut parts = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        // Don't rescan what we've already searched
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let part = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    if !part.is_empty() {
                        parts.push(part);
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        parts
    }
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one JPEG part and post it. An undecodable part is skipped; only a
/// closed mailbox is an error.
fn post_jpeg(
    jpeg: &[u8],
    seq: u64,
    mailbox: &Mailbox,
    stats: &Arc<PipelineStats>,
) -> Result<(), SourceError> {
    let (samples, width) = match decode_luma(jpeg) {
        Ok(plane) => plane,
        Err(e) => {
            warn!(error = %e, seq, bytes = jpeg.len(), "undecodable JPEG part, skipping");
            return Ok(());
        }
    };
    let frame = LumaFrame::new(samples, width, Utc::now().timestamp_millis(), seq);
    match deliver(mailbox, stats, frame) {
        PostOutcome::Closed => Err(SourceError::Closed),
        PostOutcome::Replaced => {
            debug!(seq, "worker busy, replaced pending frame");
            Ok(())
        }
        PostOutcome::Delivered => Ok(()),
    }
}

/// Consume the MJPEG stream and feed the mailbox.
/// Reconnects with exponential backoff on failure.
pub async fn run_mjpeg_source(
    stream_url: &str,
    mailbox: &Mailbox,
    stats: &Arc<PipelineStats>,
) -> Result<(), SourceError> {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);
    let mut seq: u64 = 0;

    loop {
        info!(url = stream_url, "connecting to MJPEG stream");
        match consume_stream(stream_url, mailbox, stats, &mut seq).await {
            Ok(()) => {
                info!("stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(SourceError::Closed) => {
                info!("mailbox closed, MJPEG source stopping");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        if mailbox.is_closed() {
            return Ok(());
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(
    url: &str,
    mailbox: &Mailbox,
    stats: &Arc<PipelineStats>,
    seq: &mut u64,
) -> Result<(), SourceError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(SourceError::HttpConnect)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(SourceError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(SourceError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), "connected to MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut splitter = MjpegSplitter::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(SourceError::HttpStream)?;
        for jpeg in splitter.push(&chunk) {
            post_jpeg(&jpeg, *seq, mailbox, stats)?;
            *seq += 1;
        }
    }

    Ok(())
}

/// Polling fallback for cameras without a stream endpoint: fetch one JPEG
/// per tick.
pub async fn run_polling_source(
    frame_url: &str,
    interval: Duration,
    mailbox: &Mailbox,
    stats: &Arc<PipelineStats>,
) -> Result<(), SourceError> {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);
    let mut seq: u64 = 0;

    info!(url = frame_url, ?interval, "polling camera for frames");
    loop {
        ticker.tick().await;
        if mailbox.is_closed() {
            return Ok(());
        }

        match client.get(frame_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let jpeg = match resp.bytes().await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "failed to read camera frame body");
                        continue;
                    }
                };
                match post_jpeg(&jpeg, seq, mailbox, stats) {
                    Err(SourceError::Closed) => return Ok(()),
                    Err(e) => return Err(e),
                    Ok(()) => seq += 1,
                }
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "non-success response from camera");
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch camera frame");
            }
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
