// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lock-free single-producer/single-consumer byte ring.
//!
//! Sits between the byte-at-a-time UART interrupt and the packet-at-a-time
//! USB pipes. The write index is only ever stored by the `Producer`, the read
//! index only by the `Consumer`, so each side needs nothing more than atomic
//! loads and stores. That matters on Cortex-M0+, which has no
//! compare-and-swap.
//!
//! Indices are free-running `u8`s; the occupancy is their wrapping
//! difference, which lets the ring hold all `N` bytes without a spare slot.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU8, Ordering};

/// Capacity of the UART rings.
pub const UART_RING_SIZE: usize = 128;

pub struct RingBuffer<const N: usize> {
    storage: UnsafeCell<[u8; N]>,
    write: AtomicU8,
    read: AtomicU8,
}

// Safety: a slot is only written by the producer while it lies outside
// `read..write`, and only read by the consumer while it lies inside, so the
// two handles never touch the same byte at the same time. `split` hands out
// exactly one of each.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    const MASK: u8 = {
        assert!(N.is_power_of_two() && N <= 128);
        (N - 1) as u8
    };

    pub const fn new() -> Self {
        Self {
            storage: UnsafeCell::new([0; N]),
            write: AtomicU8::new(0),
            read: AtomicU8::new(0),
        }
    }

    /// Splits the ring into its two halves. Taking `&mut self` guarantees
    /// there is only ever one of each.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let ring: &Self = self;
        (
            Producer {
                ring,
                _not_clone: PhantomData,
            },
            Consumer {
                ring,
                _not_clone: PhantomData,
            },
        )
    }

    fn occupancy(&self) -> usize {
        let w = self.write.load(Ordering::Acquire);
        let r = self.read.load(Ordering::Acquire);
        usize::from(w.wrapping_sub(r))
    }

    fn slot(&self, index: u8) -> *mut u8 {
        let base = self.storage.get() as *mut u8;
        // Safety: masking keeps the offset inside the array.
        unsafe { base.add(usize::from(index & Self::MASK)) }
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing half; lives in the interrupt handler that receives bytes.
pub struct Producer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
    _not_clone: PhantomData<*const ()>,
}

// Safety: moving the sole producer to another context is fine; it is the
// aliasing of two producers that `split` rules out.
unsafe impl<const N: usize> Send for Producer<'_, N> {}

impl<const N: usize> Producer<'_, N> {
    /// Appends `byte`. When the ring is full the new byte is dropped and
    /// `false` is returned; what's already buffered is left alone.
    pub fn push(&mut self, byte: u8) -> bool {
        let w = self.ring.write.load(Ordering::Relaxed);
        let r = self.ring.read.load(Ordering::Acquire);
        if usize::from(w.wrapping_sub(r)) >= N {
            return false;
        }
        // Safety: slot `w` is outside the consumer's window until the store
        // below publishes it.
        unsafe { self.ring.slot(w).write_volatile(byte) };
        self.ring.write.store(w.wrapping_add(1), Ordering::Release);
        true
    }

    pub fn len(&self) -> usize {
        self.ring.occupancy()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reading half; lives in the main loop.
pub struct Consumer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
    _not_clone: PhantomData<*const ()>,
}

unsafe impl<const N: usize> Send for Consumer<'_, N> {}

impl<const N: usize> Consumer<'_, N> {
    pub fn pop(&mut self) -> Option<u8> {
        let r = self.ring.read.load(Ordering::Relaxed);
        let w = self.ring.write.load(Ordering::Acquire);
        if r == w {
            return None;
        }
        // Safety: slot `r` was published by the producer's release store and
        // stays ours until we advance `read`.
        let byte = unsafe { self.ring.slot(r).read_volatile() };
        self.ring.read.store(r.wrapping_add(1), Ordering::Release);
        Some(byte)
    }

    /// Pops as many bytes as fit in `out`, returning the count.
    pub fn pop_into(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.pop() {
                Some(b) => {
                    out[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub fn len(&self) -> usize {
        self.ring.occupancy()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards everything buffered so far. Only moves the read index, so the
    /// producer may keep pushing concurrently.
    pub fn clear(&mut self) {
        let w = self.ring.write.load(Ordering::Acquire);
        self.ring.read.store(w, Ordering::Release);
    }
}
