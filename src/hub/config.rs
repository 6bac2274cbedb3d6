//! Hub configuration

/// Configuration options for a [`StreamHub`](super::StreamHub)
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each session's chunk queue, in chunks.
    ///
    /// The producer blocks (asynchronously) once this many chunks are
    /// waiting for the engine to pull them.
    pub chunk_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { chunk_capacity: 64 }
    }
}

impl HubConfig {
    /// Set the chunk queue capacity (minimum 1).
    pub fn chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = capacity.max(1);
        self
    }
}
