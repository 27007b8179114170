use super::{checksum, OrbitTrail, ORBIT_CAPACITY};
use num_complex::Complex64;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-capacity storage for one published trajectory. Allocated once; publishing only
/// copies into it.
pub struct TrailSlot {
    points: Box<[Complex64]>,
    len: usize,
    wrap: Option<usize>,
    generation: u64,
    checksum: u64,
}

impl TrailSlot {
    fn new() -> Self {
        Self {
            points: vec![Complex64::new(0.0, 0.0); ORBIT_CAPACITY].into_boxed_slice(),
            len: 0,
            wrap: None,
            generation: 0,
            checksum: checksum(&[], None),
        }
    }

    pub fn points(&self) -> &[Complex64] {
        &self.points[..self.len]
    }

    pub fn wrap(&self) -> Option<usize> {
        self.wrap
    }

    /// Publication counter of the trail in this slot; 0 before anything was published.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Checksum written by the producer alongside the points.
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// Recomputes the checksum from the stored points and compares.
    pub fn verify(&self) -> bool {
        checksum(self.points(), self.wrap) == self.checksum
    }
}

struct Shared {
    slots: [UnsafeCell<TrailSlot>; 2],
    /// Index of the slot the reader owns.
    front: AtomicUsize,
    /// Set by the writer once the back slot is complete; cleared by the reader after it has
    /// moved `front` onto that slot.
    ready: AtomicBool,
    published: AtomicU64,
    adopted: AtomicU64,
}

// Slot access is partitioned by `front`/`ready`: the writer touches only the back slot while
// `ready` is clear, the reader touches only the front slot.
unsafe impl Sync for Shared {}
unsafe impl Send for Shared {}

/// Creates the two ends of a single-producer/single-consumer trajectory exchange.
pub fn orbit_buffer() -> (OrbitWriter, OrbitReader) {
    let shared = Arc::new(Shared {
        slots: [UnsafeCell::new(TrailSlot::new()), UnsafeCell::new(TrailSlot::new())],
        front: AtomicUsize::new(0),
        ready: AtomicBool::new(false),
        published: AtomicU64::new(0),
        adopted: AtomicU64::new(0),
    });
    (
        OrbitWriter {
            shared: Arc::clone(&shared),
            generation: 0,
        },
        OrbitReader { shared },
    )
}

/// Producer end, owned by the render thread.
pub struct OrbitWriter {
    shared: Arc<Shared>,
    generation: u64,
}

impl OrbitWriter {
    /// Copies `trail` into the back slot and marks it ready.
    ///
    /// Returns `false` without writing when the previous publication has not been adopted
    /// yet; the caller keeps the trail and retries on a later frame.
    pub fn publish(&mut self, trail: &OrbitTrail) -> bool {
        if self.shared.ready.load(Ordering::Acquire) {
            return false;
        }
        let back = 1 - self.shared.front.load(Ordering::Acquire);
        // SAFETY: `ready` is clear, so the reader has finished moving `front` and will not look
        // at the back slot until we set `ready` below.
        let slot = unsafe { &mut *self.shared.slots[back].get() };
        let n = trail.points.len().min(ORBIT_CAPACITY);
        slot.points[..n].copy_from_slice(&trail.points[..n]);
        slot.len = n;
        slot.wrap = trail.wrap.filter(|&w| w < n);
        self.generation += 1;
        slot.generation = self.generation;
        slot.checksum = checksum(&slot.points[..n], slot.wrap);
        self.shared.ready.store(true, Ordering::Release);
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// A published trail is waiting for the reader.
    pub fn pending(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    pub fn adopted(&self) -> u64 {
        self.shared.adopted.load(Ordering::Relaxed)
    }
}

/// Consumer end, owned by the audio callback. Never blocks or allocates.
pub struct OrbitReader {
    shared: Arc<Shared>,
}

impl OrbitReader {
    /// Adopts a newly published trail if one is ready. Call once per synthesized block.
    pub fn acquire(&mut self) -> bool {
        if !self.shared.ready.load(Ordering::Acquire) {
            return false;
        }
        let front = self.shared.front.load(Ordering::Relaxed);
        self.shared.front.store(1 - front, Ordering::Release);
        self.shared.ready.store(false, Ordering::Release);
        self.shared.adopted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// The trail currently owned by the reader.
    pub fn front(&self) -> &TrailSlot {
        let front = self.shared.front.load(Ordering::Relaxed);
        // SAFETY: only this reader moves `front`, and the writer never touches the front slot.
        unsafe { &*self.shared.slots[front].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trail(n: usize, base: f64) -> OrbitTrail {
        OrbitTrail {
            seed: Complex64::new(base, 0.0),
            points: (0..n).map(|k| Complex64::new(base + k as f64, -(k as f64))).collect(),
            wrap: Some(0),
            escaped: false,
        }
    }

    #[test]
    fn reader_sees_nothing_before_publish() {
        let (_w, mut r) = orbit_buffer();
        assert!(!r.acquire());
        assert_eq!(r.front().generation(), 0);
        assert!(r.front().points().is_empty());
    }

    #[test]
    fn publish_blocks_until_adopted() {
        let (mut w, mut r) = orbit_buffer();
        assert!(w.publish(&trail(4, 1.0)));
        assert!(!w.publish(&trail(4, 2.0)));
        assert!(r.acquire());
        assert_eq!(r.front().points()[0], Complex64::new(1.0, 0.0));
        assert!(r.front().verify());
        assert!(w.publish(&trail(4, 2.0)));
        // reader keeps the old trail until it acquires
        assert_eq!(r.front().points()[0], Complex64::new(1.0, 0.0));
        assert!(r.acquire());
        assert_eq!(r.front().generation(), 2);
    }
}
