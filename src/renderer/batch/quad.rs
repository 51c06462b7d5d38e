use glam::{Vec2, Vec4};

use crate::renderer::shader_data::{QuadVertex, VERTICES_PER_QUAD};

/// An axis-aligned quad submitted for one frame. Consumed into a batch
/// immediately, never retained.
#[derive(Debug, Clone, Copy)]
pub struct Quad {
    /// Bottom-left corner in world units.
    pub position: Vec2,
    pub size: Vec2,
    pub color: Vec4,
}

/// Fixed-capacity CPU mirror of one GPU vertex buffer.
///
/// Vertices are packed four per quad in submission order; the mirror is
/// uploaded as a prefix of `quad_count * 4` vertices at flush time.
pub struct QuadBatch {
    vertices: Vec<QuadVertex>,
    quad_capacity: usize,
    quad_count: usize,
}

impl QuadBatch {
    pub fn new(quad_capacity: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(quad_capacity * VERTICES_PER_QUAD),
            quad_capacity,
            quad_count: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.quad_capacity - self.quad_count
    }

    pub fn quad_count(&self) -> usize {
        self.quad_count
    }

    pub fn is_empty(&self) -> bool {
        self.quad_count == 0
    }

    /// Filled prefix of the CPU mirror.
    pub fn vertices(&self) -> &[QuadVertex] {
        &self.vertices
    }

    /// `slot` is the shifted slot attribute (0 = untextured, n + 1 = slot n).
    pub fn push(&mut self, quad: &Quad, slot: u32) {
        debug_assert!(self.remaining() > 0, "push into a full batch");
        let Quad { position, size, color } = *quad;
        let corners = [
            (position, Vec2::new(0.0, 0.0)),
            (position + Vec2::new(size.x, 0.0), Vec2::new(1.0, 0.0)),
            (position + size, Vec2::new(1.0, 1.0)),
            (position + Vec2::new(0.0, size.y), Vec2::new(0.0, 1.0)),
        ];
        for (corner, texcoord) in corners {
            self.vertices.push(QuadVertex {
                color,
                position: corner,
                texcoord,
                slot,
                _padding: [0; 3],
            });
        }
        self.quad_count += 1;
    }

    pub fn reset(&mut self) {
        self.vertices.clear();
        self.quad_count = 0;
    }
}

/// Routes an unbounded stream of quads into a bounded set of batches.
///
/// Batches fill front to back in creation order; new batches are created on
/// demand up to `max_batches`, after which quads are dropped and counted.
/// Overflow is an expected steady-state condition, not an error.
pub struct QuadBatcher {
    batches: Vec<QuadBatch>,
    quads_per_batch: usize,
    max_batches: usize,
    drawn: u32,
    truncated: u32,
}

impl QuadBatcher {
    pub fn new(quads_per_batch: usize, max_batches: usize) -> Self {
        Self {
            batches: Vec::new(),
            quads_per_batch,
            max_batches,
            drawn: 0,
            truncated: 0,
        }
    }

    /// Returns false when the quad was truncated.
    pub fn push(&mut self, quad: &Quad, slot: u32) -> bool {
        match self.batch_with_space() {
            Some(index) => {
                self.batches[index].push(quad, slot);
                self.drawn += 1;
                true
            }
            None => {
                self.truncated += 1;
                false
            }
        }
    }

    /// Partial fulfilment: as many quads as fit are spread across batches,
    /// the rest are counted as truncated. Returns how many were accepted.
    pub fn push_many(&mut self, quads: &[Quad], slot: u32) -> usize {
        let mut accepted = 0;
        for quad in quads {
            if !self.push(quad, slot) {
                // Every batch is full and no more may be created; the rest
                // of the array cannot fit either.
                self.truncated += (quads.len() - accepted - 1) as u32;
                break;
            }
            accepted += 1;
        }
        accepted
    }

    fn batch_with_space(&mut self) -> Option<usize> {
        if let Some(index) = self.batches.iter().position(|batch| batch.remaining() > 0) {
            return Some(index);
        }
        if self.batches.len() < self.max_batches {
            self.batches.push(QuadBatch::new(self.quads_per_batch));
            return Some(self.batches.len() - 1);
        }
        None
    }

    pub fn batches(&self) -> &[QuadBatch] {
        &self.batches
    }

    pub fn batches_mut(&mut self) -> &mut [QuadBatch] {
        &mut self.batches
    }

    pub fn active_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn drawn(&self) -> u32 {
        self.drawn
    }

    pub fn truncated(&self) -> u32 {
        self.truncated
    }

    pub fn reset_counters(&mut self) {
        self.drawn = 0;
        self.truncated = 0;
    }

    /// Frees only the trailing run of empty batches. Batches fill front to
    /// back, so an empty batch ahead of a filled one never exists unless a
    /// caller could vacate quads mid-batch, which is unsupported.
    pub fn compact_trailing(&mut self) -> usize {
        let mut removed = 0;
        while let Some(last) = self.batches.last() {
            if !last.is_empty() {
                break;
            }
            self.batches.pop();
            removed += 1;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(x: f32, y: f32) -> Quad {
        Quad {
            position: Vec2::new(x, y),
            size: Vec2::new(8.0, 8.0),
            color: Vec4::new(1.0, 0.5, 0.25, 1.0),
        }
    }

    #[test]
    fn empty_batcher_has_nothing_to_draw() {
        let mut batcher = QuadBatcher::new(4, 2);
        assert_eq!(batcher.active_batches(), 0);
        assert_eq!(batcher.drawn(), 0);
        assert_eq!(batcher.truncated(), 0);
        assert_eq!(batcher.compact_trailing(), 0);
    }

    #[test]
    fn counts_match_while_under_capacity() {
        let mut batcher = QuadBatcher::new(4, 2);
        for i in 0..8 {
            assert!(batcher.push(&quad(i as f32, 0.0), 0));
        }
        assert_eq!(batcher.drawn(), 8);
        assert_eq!(batcher.truncated(), 0);
        assert_eq!(batcher.active_batches(), 2);
    }

    #[test]
    fn overflow_truncates_exactly() {
        // 1000-quad batches capped at two: 2500 submissions keep 2000.
        let mut batcher = QuadBatcher::new(1000, 2);
        let quads: Vec<Quad> = (0..2500).map(|i| quad(i as f32, 0.0)).collect();
        let accepted = batcher.push_many(&quads, 0);

        assert_eq!(accepted, 2000);
        assert_eq!(batcher.drawn(), 2000);
        assert_eq!(batcher.truncated(), 500);
        assert_eq!(batcher.drawn() + batcher.truncated(), 2500);
        assert_eq!(batcher.active_batches(), 2);
    }

    #[test]
    fn array_push_is_partially_fulfilled() {
        let mut batcher = QuadBatcher::new(2, 1);
        let quads: Vec<Quad> = (0..5).map(|i| quad(i as f32, 1.0)).collect();
        assert_eq!(batcher.push_many(&quads, 3), 2);
        assert_eq!(batcher.truncated(), 3);
    }

    #[test]
    fn vertices_survive_packing_bit_for_bit() {
        let mut batch = QuadBatch::new(4);
        let submitted = Quad {
            position: Vec2::new(12.625, -3.0),
            size: Vec2::new(5.5, 7.75),
            color: Vec4::new(0.1, 0.2, 0.3, 0.4),
        };
        batch.push(&submitted, 9);

        let verts = batch.vertices();
        assert_eq!(verts.len(), 4);
        assert_eq!(verts[0].position, submitted.position);
        assert_eq!(verts[2].position, submitted.position + submitted.size);
        for vert in verts {
            assert_eq!(vert.color.to_array(), submitted.color.to_array());
            assert_eq!(vert.slot, 9);
        }
        assert_eq!(verts[0].texcoord, Vec2::new(0.0, 0.0));
        assert_eq!(verts[2].texcoord, Vec2::new(1.0, 1.0));
    }

    #[test]
    fn quads_keep_submission_order_within_a_batch() {
        let mut batcher = QuadBatcher::new(8, 1);
        batcher.push(&quad(1.0, 0.0), 0);
        batcher.push(&quad(2.0, 0.0), 0);
        let verts = batcher.batches()[0].vertices();
        assert_eq!(verts[0].position.x, 1.0);
        assert_eq!(verts[4].position.x, 2.0);
    }

    #[test]
    fn compaction_removes_only_trailing_empty_batches() {
        let mut batcher = QuadBatcher::new(1, 4);
        batcher.push(&quad(0.0, 0.0), 0);
        batcher.push(&quad(1.0, 0.0), 0);
        // Force two more batches into existence, then empty them.
        batcher.push(&quad(2.0, 0.0), 0);
        batcher.push(&quad(3.0, 0.0), 0);
        batcher.batches_mut()[2].reset();
        batcher.batches_mut()[3].reset();

        assert_eq!(batcher.compact_trailing(), 2);
        assert_eq!(batcher.active_batches(), 2);

        // An empty batch ahead of a filled one must survive compaction.
        batcher.batches_mut()[0].reset();
        assert_eq!(batcher.compact_trailing(), 0);
        assert_eq!(batcher.active_batches(), 2);
    }
}
