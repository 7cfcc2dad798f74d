use crate::device::BufferUsage;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct BufferSpec {
    /// Capacity in elements before the first growth.
    pub initial_capacity: u64,
    pub usage: BufferUsage,
    /// Adds a 4-byte append counter next to the buffer, for indirect execution.
    pub has_counter: bool,
    pub debug_name: Option<String>,
}

impl Default for BufferSpec {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            usage: BufferUsage::Storage,
            has_counter: false,
            debug_name: None,
        }
    }
}

impl BufferSpec {
    pub fn new(initial_capacity: u64) -> Self {
        Self {
            initial_capacity,
            ..Default::default()
        }
    }

    pub fn usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_counter(mut self) -> Self {
        self.has_counter = true;
        self
    }

    pub fn debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    pub(crate) fn name(&self) -> &str {
        self.debug_name.as_deref().unwrap_or("unnamed buffer")
    }
}
