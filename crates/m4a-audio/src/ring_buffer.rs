//! Sample hand-off between the render thread and the audio callback.
//!
//! The render thread pushes whole render ticks and sleeps while the
//! callback still has enough buffered to cover `num_buffers` of its own
//! blocks. The callback takes exactly one block per call, or writes
//! silence if that much is not available yet. It never locks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use m4a_ir::StereoSample;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Upper bound on one producer sleep. The callback signals without taking
/// the mutex, so a wakeup can slip between the check and the wait.
const PRODUCER_POLL: Duration = Duration::from_millis(5);

struct Shared {
    last_take: AtomicUsize,
    num_buffers: AtomicUsize,
    closed: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

/// Create a ring holding up to `capacity` samples.
pub fn sample_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let (prod, cons) = HeapRb::<StereoSample>::new(capacity.max(1)).split();
    let shared = Arc::new(Shared {
        last_take: AtomicUsize::new(0),
        num_buffers: AtomicUsize::new(1),
        closed: AtomicBool::new(false),
        lock: Mutex::new(()),
        cv: Condvar::new(),
    });
    (
        RingProducer { prod, shared: shared.clone() },
        RingConsumer { cons, shared },
    )
}

/// Render side of the ring.
pub struct RingProducer {
    prod: HeapProd<StereoSample>,
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Extra callback blocks to keep buffered; 0 is treated as 1.
    pub fn set_num_buffers(&self, num_buffers: usize) {
        self.shared.num_buffers.store(num_buffers.max(1), Ordering::Relaxed);
    }

    /// Size of the last block the consumer asked for.
    pub fn last_take(&self) -> usize {
        self.shared.last_take.load(Ordering::Relaxed)
    }

    pub fn buffered(&self) -> usize {
        self.prod.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.prod.capacity().get()
    }

    /// Wake a blocked [`put`](Self::put) and make further calls return at once.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Handle that can close the ring from another thread.
    pub fn closer(&self) -> RingCloser {
        RingCloser { shared: self.shared.clone() }
    }

    /// Push `block`, blocking while enough is buffered. Returns `false` if
    /// the ring was closed before everything was pushed.
    pub fn put(&mut self, mut block: &[StereoSample]) -> bool {
        while !block.is_empty() {
            self.wait_for_room(block.len());
            if self.is_closed() {
                return false;
            }
            let pushed = self.prod.push_slice(block);
            block = &block[pushed..];
        }
        true
    }

    fn wait_for_room(&self, wanted: usize) {
        let shared = &*self.shared;
        let mut guard = match shared.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if self.is_closed() {
                return;
            }
            let target = shared.num_buffers.load(Ordering::Relaxed)
                * shared.last_take.load(Ordering::Relaxed);
            let buffered = self.prod.occupied_len();
            let vacant = self.prod.vacant_len();
            // a block larger than the ring goes in piece by piece
            let room = vacant >= wanted.min(self.capacity());
            if buffered <= target && room {
                return;
            }
            guard = match shared.cv.wait_timeout(guard, PRODUCER_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// Closes a ring without owning either end.
#[derive(Clone)]
pub struct RingCloser {
    shared: Arc<Shared>,
}

impl RingCloser {
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.cv.notify_all();
    }
}

/// Callback side of the ring.
pub struct RingConsumer {
    cons: HeapCons<StereoSample>,
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// Fill `out` from the ring, or with silence if fewer samples are
    /// buffered. Never blocks or allocates.
    pub fn take(&mut self, out: &mut [StereoSample]) -> bool {
        self.shared.last_take.store(out.len(), Ordering::Relaxed);

        if self.cons.occupied_len() < out.len() {
            out.fill(StereoSample::silence());
            self.shared.cv.notify_one();
            return false;
        }

        let taken = self.cons.pop_slice(out);
        debug_assert_eq!(taken, out.len());
        self.shared.cv.notify_one();
        true
    }

    pub fn buffered(&self) -> usize {
        self.cons.occupied_len()
    }
}

impl Drop for RingConsumer {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.cv.notify_all();
    }
}
