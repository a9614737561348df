// SPDX-License-Identifier: GPL-3.0-or-later
//! A two slot hand-off of complete frames between a single producer and a single consumer.
//!
//! The producer owns the write slot outright, so filling it never takes the lock. Once a frame is
//! complete the two slots are exchanged while holding the lock, which is a constant time swap of
//! the underlying allocations. The consumer can only reach the read slot through a [`FrameGuard`],
//! so the slot it is looking at cannot be replaced until the guard is dropped.
use std::mem;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use parking_lot::{Mutex, MutexGuard};

use crate::error::CaptureError;

#[derive(Debug)]
struct Slot<T> {
    /// 0 until the first frame has been written, incremented for every completed frame after
    /// that.
    sequence: u64,
    samples: Array2<T>,
}

impl<T> Slot<T>
where
    T: Clone + Default,
{
    fn zeroed(width: usize, height: usize) -> Self {
        Self {
            sequence: 0,
            samples: Array2::default((height, width)),
        }
    }
}

/// Constructor for the producer and consumer halves of a double buffer.
pub(crate) struct DoubleFrameBuffer;

impl DoubleFrameBuffer {
    /// Allocate both slots (zeroed) for frames of the given size.
    ///
    /// The sample type is the type parameter; raw thermal frames use `u16`.
    pub(crate) fn new<T>(width: usize, height: usize) -> (FrameWriter<T>, FrameReader<T>)
    where
        T: Clone + Default,
    {
        let shared = Arc::new(Mutex::new(Slot::zeroed(width, height)));
        let writer = FrameWriter {
            back: Slot::zeroed(width, height),
            front: Arc::clone(&shared),
            next_sequence: 1,
        };
        let reader = FrameReader { front: shared };
        (writer, reader)
    }
}

/// The producer half of a double buffer.
///
/// There is deliberately no `Clone` implementation, as only a single writer is supported.
#[derive(Debug)]
pub(crate) struct FrameWriter<T> {
    back: Slot<T>,
    front: Arc<Mutex<Slot<T>>>,
    next_sequence: u64,
}

impl<T> FrameWriter<T>
where
    T: Copy,
{
    /// Copy a complete row-major frame into the write slot, then publish it.
    ///
    /// Slices that are not exactly `width * height` samples long are rejected and nothing is
    /// published.
    pub(crate) fn write(&mut self, frame_data: &[T]) -> Result<(), CaptureError> {
        let expected = self.back.samples.len();
        if frame_data.len() != expected {
            return Err(CaptureError::MalformedFrame {
                expected,
                actual: frame_data.len(),
            });
        }
        self.write_with(|mut slot| {
            for (dest, source) in slot.iter_mut().zip(frame_data.iter()) {
                *dest = *source;
            }
        });
        Ok(())
    }

    /// Fill the write slot in place, then publish it.
    ///
    /// The closure is given the entire write slot and must overwrite every sample in it; the slot
    /// still holds an older frame when the closure is called.
    pub(crate) fn write_with<F>(&mut self, fill: F)
    where
        F: FnOnce(ArrayViewMut2<T>),
    {
        fill(self.back.samples.view_mut());
        self.back.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.swap();
    }

    /// The dimensions of each frame as `(width, height)`.
    pub(crate) fn dimensions(&self) -> (usize, usize) {
        let (height, width) = self.back.samples.dim();
        (width, height)
    }

    fn swap(&mut self) {
        let mut front = self.front.lock();
        mem::swap(&mut *front, &mut self.back);
    }
}

/// The consumer half of a double buffer.
#[derive(Debug)]
pub(crate) struct FrameReader<T> {
    front: Arc<Mutex<Slot<T>>>,
}

impl<T> FrameReader<T>
where
    T: Copy,
{
    /// Acquire the lock guarding the read slot.
    ///
    /// Hold the guard only for as long as it takes to copy the frame out.
    pub(crate) fn lock(&self) -> FrameGuard<'_, T> {
        FrameGuard {
            guard: self.front.lock(),
        }
    }

    /// Copy the most recent complete frame into `destination`, returning its sequence number.
    ///
    /// # Panics
    ///
    /// If `destination` is not the same shape as the frames in this buffer.
    pub(crate) fn copy_latest_into(&self, destination: &mut Array2<T>) -> u64 {
        let guard = self.lock();
        destination.assign(&guard.read());
        guard.sequence()
    }
}

/// Proof that the read slot lock is held.
pub(crate) struct FrameGuard<'a, T> {
    guard: MutexGuard<'a, Slot<T>>,
}

impl<'a, T> FrameGuard<'a, T> {
    /// The current read slot. It will not change while this guard is alive.
    pub(crate) fn read(&self) -> ArrayView2<'_, T> {
        self.guard.samples.view()
    }

    /// The sequence number of the frame in the read slot. Zero means nothing has been written
    /// yet.
    pub(crate) fn sequence(&self) -> u64 {
        self.guard.sequence
    }
}
