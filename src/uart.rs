//! Serial port model.
//!
//! The platform's receive interrupt deposits bytes into a bounded ring
//! that the reading task drains later, so the ring is the one structure
//! in the core shared between an interrupt writer and a task reader. Its
//! contract is single-producer single-consumer: the occupancy count is
//! the source of truth for emptiness and is published with release
//! ordering only after the byte itself is stored, with the matching
//! acquire on the observer side.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::file::FdFlags;
use crate::param::{UARTRXBUF, UARTTXBUF};

/// Bounded SPSC byte ring.
pub struct Ring<const N: usize> {
    buf: [u8; N],
    /// Read position, touched only by the consumer.
    r: usize,
    /// Write position, touched only by the producer.
    w: usize,
    count: AtomicUsize,
}

impl<const N: usize> Ring<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            r: 0,
            w: 0,
            count: AtomicUsize::new(0),
        }
    }

    /// Producer side. Returns false (dropping the byte) when full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.count.load(Ordering::Acquire) == N {
            return false;
        }
        self.buf[self.w] = byte;
        self.w = (self.w + 1) % N;
        // The byte is in place; only now may the consumer see it.
        self.count.fetch_add(1, Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn pop(&mut self) -> Option<u8> {
        if self.count.load(Ordering::Acquire) == 0 {
            return None;
        }
        let byte = self.buf[self.r];
        self.r = (self.r + 1) % N;
        self.count.fetch_sub(1, Ordering::Release);
        Some(byte)
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }
}

/// One serial port: the receive ring fed by the interrupt handler and
/// the transmit FIFO drained by the wire.
pub struct Uart {
    rx: Ring<UARTRXBUF>,
    tx: Ring<UARTTXBUF>,
}

impl Uart {
    pub const fn new() -> Self {
        Self {
            rx: Ring::new(),
            tx: Ring::new(),
        }
    }

    /// Receive-interrupt entry point; a full ring drops the byte.
    pub fn recv_intr(&mut self, byte: u8) {
        let _ = self.rx.push(byte);
    }

    /// Drains up to `buf.len()` received bytes, returning however many
    /// were pending.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.rx.pop() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Queues every byte for transmission. The port is always writable:
    /// when the FIFO is full its oldest byte has already left for the
    /// wire, so it is evicted to make room.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        for &byte in buf {
            if !self.tx.push(byte) {
                let _ = self.tx.pop();
                let _ = self.tx.push(byte);
            }
        }
        buf.len()
    }

    /// Writable always; readable when receive bytes are pending.
    pub fn poll(&self) -> FdFlags {
        let mut flags = FdFlags::WRITABLE;
        if !self.rx.is_empty() {
            flags |= FdFlags::READABLE;
        }
        flags
    }

    /// A serial port has nothing to release.
    pub fn close(&mut self) {}

    /// Lets the platform move one byte from the FIFO onto the wire.
    pub fn pop_tx(&mut self) -> Option<u8> {
        self.tx.pop()
    }

    pub fn rx_pending(&self) -> usize {
        self.rx.len()
    }
}
