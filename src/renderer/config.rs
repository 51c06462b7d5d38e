/// Contains configuration options for the renderer like vsync, frame
/// pipelining depth, and batch capacity limits
pub struct RenderConfig {
    pub vsync: bool,

    /// How many frames may be recorded ahead of GPU execution.
    pub frames_in_flight: usize,

    /// Quad capacity of a single geometry batch.
    pub quads_per_batch: usize,

    /// Hard cap on batches per layer; quads beyond this are truncated.
    pub max_batches: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            frames_in_flight: 2,
            quads_per_batch: 1000,
            max_batches: 64,
        }
    }
}
