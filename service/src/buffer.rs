//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Bounded byte buffer with a read cursor

use bytes::BytesMut;

/// A fixed-capacity FIFO of bytes plus a cursor marking how much has been sent.
///
/// Bytes are appended at the end and consumed from `pos`. Nothing is reclaimed
/// until [`ByteBuffer::reset`], so the cursor never moves backwards while a
/// transfer is in progress.
#[derive(Debug)]
pub struct ByteBuffer {
    data: BytesMut,
    pos: usize,
    capacity: usize,
}

impl ByteBuffer {
    /// Create an empty buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            pos: 0,
            capacity,
        }
    }

    /// Bytes stored, sent or not
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Free space left
    pub fn room(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    /// Append as much of `src` as fits, returning how many bytes were taken
    pub fn append(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.room());
        self.data.extend_from_slice(&src[..n]);
        n
    }

    /// Bytes from the cursor to the end
    pub fn unsent(&self) -> &[u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Everything stored
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Move the cursor forward by `n`, stopping at the end
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
    }

    /// Whether the cursor has reached the end
    pub fn is_drained(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Empty the buffer and rewind the cursor
    pub fn reset(&mut self) {
        self.data.clear();
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_respects_capacity() {
        let mut buf = ByteBuffer::new(4);
        assert_eq!(buf.append(b"abc"), 3);
        assert_eq!(buf.append(b"def"), 1);
        assert_eq!(buf.as_slice(), b"abcd");
        assert_eq!(buf.room(), 0);
    }

    #[test]
    fn test_cursor_and_reset() {
        let mut buf = ByteBuffer::new(8);
        buf.append(b"hello");
        buf.advance(2);
        assert_eq!(buf.unsent(), b"llo");
        assert!(!buf.is_drained());
        buf.advance(10);
        assert!(buf.is_drained());
        assert!(buf.unsent().is_empty());
        buf.reset();
        assert!(buf.is_empty());
        buf.append(b"x");
        assert_eq!(buf.unsent(), b"x");
    }
}
