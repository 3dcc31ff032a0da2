//! Local video file source using FFmpeg.
//!
//! Frames are decoded in-memory and converted to packed RGB24. End of file is
//! reported as end-of-stream after the decoder has been drained; `seek_to_start`
//! rewinds the demuxer and flushes the decoder so the file can be replayed.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats, UnreadableFrame};
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
    pass_position: u64,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegFileSource {
    pub(crate) fn new(path: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video file '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
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

        log::info!(
            "FfmpegFileSource: opened {} ({}x{})",
            path,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            eof_sent: false,
            pass_position: 0,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        for (stream, packet) in self.input.packets() {
            if stream.index() == stream_index {
                return Some(packet);
            }
        }
        None
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Frame::new(pixels, width, height, self.pass_position)
    }

    fn decode_next(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.pass_position += 1;
                let frame = self.convert(&decoded).map_err(|e| {
                    anyhow::Error::new(UnreadableFrame::new(
                        format!("{}#{}", self.path, self.pass_position),
                        format!("{:#}", e),
                    ))
                })?;
                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.next_packet() {
                Some(packet) => match self.decoder.send_packet(&packet) {
                    Ok(()) => {}
                    // corrupt packet; the decoder stays usable
                    Err(ffmpeg::Error::InvalidData) => {
                        return Err(anyhow::Error::new(UnreadableFrame::new(
                            format!("{}#{}", self.path, self.pass_position + 1),
                            "invalid packet data",
                        )));
                    }
                    Err(e) => return Err(e).context("send packet to ffmpeg decoder"),
                },
                None => {
                    self.decoder
                        .send_eof()
                        .context("drain ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

impl FrameSource for FfmpegFileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let result = self.decode_next();
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.input
            .seek(0, ..)
            .with_context(|| format!("failed to rewind {}", self.path))?;
        self.decoder.flush();
        self.eof_sent = false;
        self.pass_position = 0;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        match self.last_frame_at {
            Some(last_frame_at) => last_frame_at.elapsed() <= Duration::from_secs(5),
            None => true,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            restarts: 0,
            location: self.path.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame is shorter than expected")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
