use color_eyre::Result;

/// Fence operations for a set of frame slots. The Vulkan implementation in
/// `frame/mod.rs` blocks on `vkWaitForFences`; tests substitute a mock.
pub trait FenceSet {
    /// Block until the slot's fence signals. Waits are effectively infinite;
    /// a hung GPU surfaces as a device-loss error, not a timeout.
    fn wait(&mut self, slot: usize) -> Result<()>;
    fn reset(&mut self, slot: usize) -> Result<()>;
}

/// Tracks which of the F frame slots is being recorded, which are still
/// unretired on the GPU, and which slot last wrote each swapchain image.
///
/// At most F frames are simultaneously unretired: starting slot `i` again
/// first waits on slot `i`'s fence from F frames ago. Swapchain images are
/// indexed independently of slots (N need not equal F), so claiming an image
/// may require a second wait on its previous writer.
pub struct FrameScheduler {
    slot: usize,
    frames_in_flight: usize,
    pending: Vec<bool>,
    image_writer: Vec<Option<usize>>,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            slot: 0,
            frames_in_flight,
            pending: vec![false; frames_in_flight],
            image_writer: vec![None; image_count],
        }
    }

    pub fn current_slot(&self) -> usize {
        self.slot
    }

    /// Step 1 of the frame: retire this slot's previous submission.
    pub fn begin_frame(&mut self, fences: &mut impl FenceSet) -> Result<()> {
        if self.pending[self.slot] {
            fences.wait(self.slot)?;
            self.pending[self.slot] = false;
        }
        Ok(())
    }

    /// Step 2: the acquired image may still be mid-present from a different,
    /// still-pending slot (write-after-write hazard when N > F).
    pub fn claim_image(&mut self, image: usize, fences: &mut impl FenceSet) -> Result<()> {
        if let Some(writer) = self.image_writer[image] {
            if writer != self.slot && self.pending[writer] {
                fences.wait(writer)?;
                self.pending[writer] = false;
            }
        }
        self.image_writer[image] = Some(self.slot);
        Ok(())
    }

    /// The submit is about to signal this slot's fence; reset it first.
    pub fn prepare_submit(&mut self, fences: &mut impl FenceSet) -> Result<()> {
        fences.reset(self.slot)?;
        Ok(())
    }

    /// Step 10: the slot is now in flight; move on to the next timeline.
    pub fn end_frame(&mut self) {
        self.pending[self.slot] = true;
        self.slot = (self.slot + 1) % self.frames_in_flight;
    }

    /// Swapchain rebuilt; previous per-image writers are meaningless.
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_writer = vec![None; image_count];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;

    /// Fences that fail the wait unless explicitly signaled, standing in for
    /// GPU work that has not completed.
    struct MockFences {
        signaled: Vec<bool>,
        waits: Vec<usize>,
        resets: Vec<usize>,
    }

    impl MockFences {
        fn new(count: usize) -> Self {
            Self {
                signaled: vec![false; count],
                waits: Vec::new(),
                resets: Vec::new(),
            }
        }

        fn signal(&mut self, slot: usize) {
            self.signaled[slot] = true;
        }
    }

    impl FenceSet for MockFences {
        fn wait(&mut self, slot: usize) -> Result<()> {
            self.waits.push(slot);
            if !self.signaled[slot] {
                return Err(eyre!("would block on fence {slot}"));
            }
            Ok(())
        }

        fn reset(&mut self, slot: usize) -> Result<()> {
            self.resets.push(slot);
            self.signaled[slot] = false;
            Ok(())
        }
    }

    fn drive_one_frame(
        scheduler: &mut FrameScheduler,
        fences: &mut MockFences,
        image: usize,
    ) -> Result<()> {
        scheduler.begin_frame(fences)?;
        scheduler.claim_image(image, fences)?;
        scheduler.prepare_submit(fences)?;
        scheduler.end_frame();
        Ok(())
    }

    #[test]
    fn third_frame_blocks_until_first_fence_signals() {
        // F = 2, three swapchain images, GPU never finishing anything.
        let mut scheduler = FrameScheduler::new(2, 3);
        let mut fences = MockFences::new(2);

        drive_one_frame(&mut scheduler, &mut fences, 0).unwrap();
        drive_one_frame(&mut scheduler, &mut fences, 1).unwrap();
        assert!(fences.waits.is_empty());

        // Slot 0 from two frames ago is still unretired.
        let blocked = scheduler.begin_frame(&mut fences);
        assert!(blocked.is_err());
        assert_eq!(fences.waits, vec![0]);

        // Once the GPU retires frame 1, the same call goes through.
        fences.signal(0);
        scheduler.begin_frame(&mut fences).unwrap();
        assert_eq!(scheduler.current_slot(), 0);
    }

    #[test]
    fn five_frames_wait_on_every_prior_slot_in_order() {
        let mut scheduler = FrameScheduler::new(2, 2);
        let mut fences = MockFences::new(2);

        for frame in 0..5 {
            if frame >= 2 {
                // The GPU retires exactly the frame from two slots ago.
                fences.signal(frame % 2);
            }
            drive_one_frame(&mut scheduler, &mut fences, frame % 2).unwrap();
        }
        assert_eq!(fences.waits, vec![0, 1, 0]);
    }

    #[test]
    fn claiming_an_image_waits_on_its_pending_writer() {
        // N = 3 images but F = 3 slots, image 0 reused by a different slot
        // while its writer is still pending.
        let mut scheduler = FrameScheduler::new(3, 3);
        let mut fences = MockFences::new(3);

        drive_one_frame(&mut scheduler, &mut fences, 0).unwrap();
        drive_one_frame(&mut scheduler, &mut fences, 1).unwrap();

        // Slot 2 acquires image 0, last written by still-pending slot 0.
        scheduler.begin_frame(&mut fences).unwrap();
        let blocked = scheduler.claim_image(0, &mut fences);
        assert!(blocked.is_err());
        assert_eq!(fences.waits, vec![0]);

        fences.signal(0);
        scheduler.claim_image(0, &mut fences).unwrap();
    }

    #[test]
    fn reclaiming_an_image_from_the_same_slot_does_not_wait() {
        let mut scheduler = FrameScheduler::new(2, 2);
        let mut fences = MockFences::new(2);

        scheduler.begin_frame(&mut fences).unwrap();
        scheduler.claim_image(0, &mut fences).unwrap();
        // Same slot claims the same image again before submitting.
        scheduler.claim_image(0, &mut fences).unwrap();
        assert!(fences.waits.is_empty());
    }

    #[test]
    fn slots_advance_modulo_frames_in_flight() {
        let mut scheduler = FrameScheduler::new(2, 2);
        assert_eq!(scheduler.current_slot(), 0);
        scheduler.end_frame();
        assert_eq!(scheduler.current_slot(), 1);
        scheduler.end_frame();
        assert_eq!(scheduler.current_slot(), 0);
    }

    #[test]
    fn fences_are_reset_before_submission() {
        let mut scheduler = FrameScheduler::new(2, 2);
        let mut fences = MockFences::new(2);
        drive_one_frame(&mut scheduler, &mut fences, 0).unwrap();
        assert_eq!(fences.resets, vec![0]);
    }

    #[test]
    fn swapchain_rebuild_clears_image_writers() {
        let mut scheduler = FrameScheduler::new(2, 2);
        let mut fences = MockFences::new(2);
        drive_one_frame(&mut scheduler, &mut fences, 0).unwrap();

        scheduler.reset_images(3);
        // Image 0's old writer is gone; no wait happens even though slot 0
        // is still pending.
        scheduler.begin_frame(&mut fences).unwrap();
        scheduler.claim_image(0, &mut fences).unwrap();
        assert!(fences.waits.is_empty());
    }
}
