//! Fixed-size bit vectors and the buffer pool that backs them.
//!
//! A [`BitField`] is byte aligned: its bit size is always `byte_size * 8`,
//! even when constructed for a bit count that is not a multiple of eight.

/// Maximum number of idle buffers a [`BufferPool`] keeps around.
const DEFAULT_POOL_CAPACITY: usize = 16;

/// A caller-owned pool of byte buffers.
///
/// The sync loop builds a fresh Bloom filter every round. Handing the previous
/// round's buffers back to a pool lets the next round skip the allocation.
#[derive(Debug)]
pub struct BufferPool {
    free: Vec<Vec<u8>>,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool holding at most [`DEFAULT_POOL_CAPACITY`] idle buffers.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Create a pool holding at most `capacity` idle buffers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Take a zeroed buffer of exactly `len` bytes.
    ///
    /// Prefers an idle buffer whose allocation already fits `len`.
    pub fn acquire(&mut self, len: usize) -> Vec<u8> {
        let found = self.free.iter().position(|b| b.capacity() >= len);
        let mut buf = match found {
            Some(idx) => self.free.swap_remove(idx),
            None => Vec::with_capacity(len),
        };
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    /// Return a buffer to the pool. Dropped if the pool is full.
    pub fn release(&mut self, buf: Vec<u8>) {
        if self.free.len() < self.capacity && buf.capacity() > 0 {
            self.free.push(buf);
        }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A byte-aligned bit array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    buffer: Vec<u8>,
}

impl BitField {
    /// Create a zeroed field able to hold at least `bits` bits.
    pub fn new(bits: usize) -> Self {
        Self {
            buffer: vec![0u8; byte_len(bits)],
        }
    }

    /// Create a zeroed field using a buffer taken from `pool`.
    pub fn from_pool(bits: usize, pool: &mut BufferPool) -> Self {
        Self {
            buffer: pool.acquire(byte_len(bits)),
        }
    }

    /// Wrap an existing buffer. The bit size becomes `buf.len() * 8`.
    pub fn from_buffer(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }

    pub fn bit_size(&self) -> usize {
        self.buffer.len() * 8
    }

    pub fn byte_size(&self) -> usize {
        self.buffer.len()
    }

    /// Read the bit at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= bit_size()`.
    pub fn get(&self, idx: usize) -> bool {
        let (byte, mask) = locate(idx);
        self.buffer[byte] & mask != 0
    }

    /// Write the bit at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= bit_size()`.
    pub fn set(&mut self, idx: usize, value: bool) {
        let (byte, mask) = locate(idx);
        if value {
            self.buffer[byte] |= mask;
        } else {
            self.buffer[byte] &= !mask;
        }
    }

    /// Zero every bit.
    pub fn clear(&mut self) {
        self.buffer.fill(0);
    }

    /// Number of bits currently set.
    pub fn count_ones(&self) -> usize {
        self.buffer.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Adopt `buffer` as the backing storage and return the previous one.
    ///
    /// Used when restoring an encoded filter; the caller may hand the returned
    /// buffer to a [`BufferPool`].
    pub fn set_buffer(&mut self, buffer: Vec<u8>) -> Vec<u8> {
        std::mem::replace(&mut self.buffer, buffer)
    }

    /// Give the backing buffer back to `pool` without deallocating it.
    pub fn reuse(self, pool: &mut BufferPool) {
        pool.release(self.buffer);
    }
}

fn byte_len(bits: usize) -> usize {
    bits.div_ceil(8)
}

#[inline]
fn locate(idx: usize) -> (usize, u8) {
    (idx >> 3, 1u8 << (idx & 7))
}
