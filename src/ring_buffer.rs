use core::cell::UnsafeCell;
use core::convert::Infallible;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Circular buffer receiving bytes from a USART (or any other peripheral)
/// interrupt.
///
/// One slot always stays unused so that `read == write` unambiguously means
/// empty: a buffer of capacity `N` holds at most `N - 1` bytes.
///
/// Bytes go in through the [`Producer`] (the receive interrupt) and come out
/// through the [`Consumer`] (the main context). [`RingBuffer::split`] hands
/// out exactly one of each, and each index is stored by one side only, so no
/// lock is needed.
pub struct RingBuffer<const N: usize> {
    buffer: UnsafeCell<[u8; N]>,
    /// Index of the next byte to be written. Producer-owned.
    write: AtomicUsize,
    /// Index of the next byte to be read. Consumer-owned.
    read: AtomicUsize,
}

// Only the handles touch the slots or store an index, and `split` needs
// exclusive access to create them.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buffer: UnsafeCell::new([0; N]),
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let ring = &*self;
        (Producer { ring }, Consumer { ring })
    }

    fn next(index: usize) -> usize {
        (index + 1) % N
    }

    fn size(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Relaxed);
        if write >= read {
            write - read
        } else {
            (N - read) + write
        }
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Write end of a [`RingBuffer`], owned by the receive interrupt.
pub struct Producer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<const N: usize> Producer<'_, N> {
    /// Stores a byte. Returns `false` and drops the byte if the buffer is full.
    pub fn put(&mut self, byte: u8) -> bool {
        let ring = self.ring;
        let write = ring.write.load(Ordering::Relaxed);
        let next = RingBuffer::<N>::next(write);
        if next == ring.read.load(Ordering::Acquire) {
            return false;
        }
        // The consumer never touches the slot at `write` until the index
        // below is published.
        unsafe {
            (*ring.buffer.get())[write] = byte;
        }
        ring.write.store(next, Ordering::Release);
        true
    }
}

/// Read end of a [`RingBuffer`], owned by the main context.
pub struct Consumer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<const N: usize> Consumer<'_, N> {
    /// Non-blocking pop.
    pub fn read(&mut self) -> nb::Result<u8, Infallible> {
        let ring = self.ring;
        let read = ring.read.load(Ordering::Relaxed);
        if read == ring.write.load(Ordering::Acquire) {
            return Err(nb::Error::WouldBlock);
        }
        let byte = unsafe { (*ring.buffer.get())[read] };
        ring.read.store(RingBuffer::<N>::next(read), Ordering::Release);
        Ok(byte)
    }

    /// Pops a byte, spinning until one is available.
    pub fn pop(&mut self) -> u8 {
        match nb::block!(self.read()) {
            Ok(byte) => byte,
            Err(never) => match never {},
        }
    }

    pub fn has_data(&self) -> bool {
        self.ring.read.load(Ordering::Relaxed) != self.ring.write.load(Ordering::Acquire)
    }

    /// Number of buffered bytes.
    pub fn size(&self) -> usize {
        self.ring.size()
    }

    /// Drops every buffered byte.
    ///
    /// Only the read index moves, so a `put` racing this call is either
    /// discarded with the rest or kept as the first byte after the flush.
    pub fn flush(&mut self) {
        let write = self.ring.write.load(Ordering::Acquire);
        self.ring.read.store(write, Ordering::Release);
    }

    /// Byte at `offset` from the read position, without consuming it.
    /// Returns 0 when `offset` is past the buffered content.
    pub fn peek_at(&self, offset: usize) -> u8 {
        if offset >= self.size() {
            return 0;
        }
        let index = (self.ring.read.load(Ordering::Relaxed) + offset) % N;
        unsafe { (*self.ring.buffer.get())[index] }
    }
}
