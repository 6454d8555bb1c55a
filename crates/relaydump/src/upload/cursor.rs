use bytes::Bytes;
use core::num::NonZeroUsize;
use std::io;

/// Bounded-pull source over one image.
///
/// Each pull copies at most the requested amount from the current offset
/// and advances past it. The sum of all pulls equals the image length.
#[derive(Clone, Debug)]
pub struct UploadCursor {
    image: Bytes,
    offset: usize,
}

impl UploadCursor {
    pub fn new(image: Bytes) -> Self {
        Self { image, offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.image.len() - self.offset
    }

    pub fn is_drained(&self) -> bool {
        self.remaining() == 0
    }

    /// Copies `min(remaining, buf.len())` bytes into `buf` and returns the
    /// count. Returns `0` only once drained or for an empty `buf`.
    pub fn pull(&mut self, buf: &mut [u8]) -> usize {
        let n = self.remaining().min(buf.len());
        buf[..n].copy_from_slice(&self.image[self.offset..self.offset + n]);
        self.offset += n;
        n
    }

    /// Yields the next `min(remaining, max)` bytes without copying, or `None`
    /// once drained. Always makes progress while bytes remain.
    pub fn next_chunk(&mut self, max: NonZeroUsize) -> Option<Bytes> {
        if self.is_drained() {
            return None;
        }
        let n = self.remaining().min(max.get());
        let chunk = self.image.slice(self.offset..self.offset + n);
        self.offset += n;
        Some(chunk)
    }

    /// Restarts the stream from the first byte.
    pub fn rewind(&mut self) {
        self.offset = 0;
    }
}

impl io::Read for UploadCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.pull(buf))
    }
}
