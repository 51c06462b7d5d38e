/// A GPU resource owns device-side handles that must be released exactly once,
/// and never while a submitted command buffer might still reference them.
///
/// `destroy` is the single release point. Destroying twice is a programmer
/// error caught by `debug_assert!`; a resource dropped while still live is
/// released by its `Drop` impl so the handle cannot leak silently.
pub trait GpuResource {
    fn destroy(&mut self);
    fn is_live(&self) -> bool;
}

/// Ring of per-future-frame resource buckets.
///
/// A resource scheduled while the ring cursor is at step S is destroyed when
/// `age_one_step` reaches step `S + delay`, where `delay = frames_in_flight + 1`.
/// That is one frame more than the pipelining depth, so even a resource
/// referenced by the most recently submitted, not yet retired frame is safe.
pub struct DestroyQueue {
    buckets: Vec<Vec<Box<dyn GpuResource>>>,
    cursor: usize,
    delay: usize,
}

impl DestroyQueue {
    pub fn new(frames_in_flight: usize) -> Self {
        let delay = frames_in_flight + 1;
        Self {
            buckets: (0..frames_in_flight + delay).map(|_| Vec::new()).collect(),
            cursor: 0,
            delay,
        }
    }

    /// Hand a resource over; the queue is its sole owner from here on.
    pub fn schedule(&mut self, resource: Box<dyn GpuResource>) {
        debug_assert!(resource.is_live(), "scheduled an already destroyed resource");
        let bucket = (self.cursor + self.delay) % self.buckets.len();
        self.buckets[bucket].push(resource);
    }

    /// Called once per drawn frame, after present.
    pub fn age_one_step(&mut self) {
        for mut resource in self.buckets[self.cursor].drain(..) {
            resource.destroy();
        }
        self.cursor = (self.cursor + 1) % self.buckets.len();
    }

    /// Shutdown path. Only legal once the device is idle.
    pub fn drain_all(&mut self) {
        let pending = self.pending();
        if pending > 0 {
            log::debug!("destroying {} resources still queued at shutdown", pending);
        }
        for bucket in &mut self.buckets {
            for mut resource in bucket.drain(..) {
                resource.destroy();
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct MockResource {
        destroyed: Rc<Cell<bool>>,
        live: bool,
    }

    impl MockResource {
        fn new() -> (Self, Rc<Cell<bool>>) {
            let destroyed = Rc::new(Cell::new(false));
            (
                Self {
                    destroyed: destroyed.clone(),
                    live: true,
                },
                destroyed,
            )
        }
    }

    impl GpuResource for MockResource {
        fn destroy(&mut self) {
            assert!(self.live, "double destroy");
            self.live = false;
            self.destroyed.set(true);
        }

        fn is_live(&self) -> bool {
            self.live
        }
    }

    #[test]
    fn destroys_only_after_delay_steps() {
        let frames_in_flight = 2;
        let mut queue = DestroyQueue::new(frames_in_flight);
        let (resource, destroyed) = MockResource::new();
        queue.schedule(Box::new(resource));

        // delay = F + 1 = 3: steps 1..=3 must leave the resource alone,
        // the bucket scheduled for step S + delay is drained on the 4th step.
        for step in 0..frames_in_flight + 1 {
            queue.age_one_step();
            assert!(!destroyed.get(), "destroyed too early at step {}", step + 1);
        }
        queue.age_one_step();
        assert!(destroyed.get());
    }

    #[test]
    fn delay_holds_from_any_ring_position() {
        let frames_in_flight = 2;
        let delay = frames_in_flight + 1;
        for start in 0..frames_in_flight + delay {
            let mut queue = DestroyQueue::new(frames_in_flight);
            for _ in 0..start {
                queue.age_one_step();
            }
            let (resource, destroyed) = MockResource::new();
            queue.schedule(Box::new(resource));
            for _ in 0..delay {
                queue.age_one_step();
                assert!(!destroyed.get(), "early destroy from ring position {}", start);
            }
            queue.age_one_step();
            assert!(destroyed.get(), "late destroy from ring position {}", start);
        }
    }

    #[test]
    fn resources_scheduled_on_different_steps_retire_in_order() {
        let mut queue = DestroyQueue::new(2);
        let (first, first_destroyed) = MockResource::new();
        queue.schedule(Box::new(first));
        queue.age_one_step();
        let (second, second_destroyed) = MockResource::new();
        queue.schedule(Box::new(second));

        for _ in 0..3 {
            queue.age_one_step();
        }
        assert!(first_destroyed.get());
        assert!(!second_destroyed.get());
        queue.age_one_step();
        assert!(second_destroyed.get());
    }

    #[test]
    fn drain_all_flushes_everything() {
        let mut queue = DestroyQueue::new(2);
        let (first, first_destroyed) = MockResource::new();
        let (second, second_destroyed) = MockResource::new();
        queue.schedule(Box::new(first));
        queue.age_one_step();
        queue.schedule(Box::new(second));
        assert_eq!(queue.pending(), 2);

        queue.drain_all();
        assert_eq!(queue.pending(), 0);
        assert!(first_destroyed.get());
        assert!(second_destroyed.get());
    }

    #[test]
    #[should_panic(expected = "double destroy")]
    fn double_destroy_is_a_defect() {
        let (mut resource, _) = MockResource::new();
        resource.destroy();
        resource.destroy();
    }
}
