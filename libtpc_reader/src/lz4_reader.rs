use lz4_flex::frame::{Error as FrameError, FrameDecoder};
use std::io::{ErrorKind, Read};

use super::error::Lz4Error;

/// Source side of the decoder. Counts consumed bytes and remembers end of input.
struct FrameInput<R: Read> {
    inner: R,
    consumed: u64,
    at_end: bool,
}

impl<R: Read> Read for FrameInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.at_end = true;
        }
        self.consumed += n as u64;
        Ok(n)
    }
}

/// Streaming decoder for the LZ4 frame format.
///
/// Decoding is done one block at a time by [`FrameDecoder`], so memory use is bounded by
/// the block size of the frame. Concatenated frames are decoded back to back and skippable
/// frames are dropped. Block and content checksums are verified when the frame declares
/// them. Failures are reported with the number of bytes decoded before them.
pub struct Lz4Reader<R: Read> {
    decoder: FrameDecoder<FrameInput<R>>,
    produced: u64,
}

impl<R: Read> Lz4Reader<R> {
    pub fn new(source: R) -> Self {
        Self {
            decoder: FrameDecoder::new(FrameInput {
                inner: source,
                consumed: 0,
                at_end: false,
            }),
            produced: 0,
        }
    }

    /// Decompressed bytes handed out so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Compressed bytes taken from the source so far
    pub fn consumed(&self) -> u64 {
        self.decoder.get_ref().consumed
    }

    fn frame_error(&self, e: std::io::Error) -> std::io::Error {
        log::debug!("LZ4 frame failed after {} bytes: {e}", self.produced);
        std::io::Error::new(
            e.kind(),
            Lz4Error::Frame {
                produced: self.produced,
                source: e,
            },
        )
    }

    /// Drop the payload of a skippable frame whose header the decoder already consumed
    fn skip_payload(&mut self, len: u32) -> std::io::Result<()> {
        let input = self.decoder.get_mut();
        let skipped = std::io::copy(&mut input.by_ref().take(len as u64), &mut std::io::sink())?;
        if skipped < len as u64 {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "skippable frame is truncated",
            ));
        }
        Ok(())
    }
}

impl<R: Read> Read for Lz4Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let before = self.consumed();
            match self.decoder.read(buf) {
                Ok(0) => {
                    // Zero bytes also come back at an end mark or an empty block. Only the
                    // end of the source ends the stream.
                    if self.decoder.get_ref().at_end || self.consumed() == before {
                        return Ok(0);
                    }
                }
                Ok(n) => {
                    self.produced += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => return Err(e),
                Err(e) => {
                    let skippable = e
                        .get_ref()
                        .and_then(|inner| inner.downcast_ref::<FrameError>())
                        .and_then(|inner| match inner {
                            FrameError::SkippableFrame(len) => Some(*len),
                            _ => None,
                        });
                    match skippable {
                        Some(len) => {
                            if let Err(e) = self.skip_payload(len) {
                                return Err(self.frame_error(e));
                            }
                        }
                        None => return Err(self.frame_error(e)),
                    }
                }
            }
        }
    }
}
