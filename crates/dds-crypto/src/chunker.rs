//! Fixed-size chunking of a byte stream

use std::io::{ErrorKind, Read};

use crate::{CryptoError, Result};

/// Lazily splits a reader into chunks of exactly `chunk_size` bytes; the final
/// chunk holds the remainder (1..=chunk_size bytes). An empty input yields no
/// chunks. At most one chunk is buffered.
pub struct ByteChunker<R: Read> {
    inner: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> ByteChunker<R> {
    pub fn new(inner: R, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CryptoError::Config("chunk size must be positive".into()));
        }
        Ok(Self {
            inner,
            chunk_size,
            done: false,
        })
    }

    /// Fill `buf` as far as the reader allows; returns bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for ByteChunker<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = vec![0u8; self.chunk_size];
        match self.fill(&mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                if n < self.chunk_size {
                    self.done = true;
                    buf.truncate(n);
                }
                Some(Ok(buf))
            }
            Err(e) => {
                self.done = true;
                Some(Err(CryptoError::Io(e)))
            }
        }
    }
}
