use parking_lot::Mutex;

use crate::{
    command::{Command, CommandStream, Transition},
    device::RawResource,
    state::ResourceState,
};

#[derive(Copy, Clone, Debug)]
pub(crate) struct Tracked {
    pub raw: RawResource,
    pub state: ResourceState,
    pub size: u64,
}

/// A buffer or texture whose usage state is known to the recorders.
///
/// The backing handle lives next to the state because growth swaps both at
/// once. Only ever locked inside a recorder lock.
pub struct TrackedResource {
    name: String,
    inner: Mutex<Tracked>,
}

impl TrackedResource {
    pub(crate) fn new(name: impl Into<String>, raw: RawResource, size: u64) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Tracked {
                raw,
                state: ResourceState::UNDEFINED,
                size,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ResourceState {
        self.inner.lock().state
    }

    pub fn raw(&self) -> RawResource {
        self.inner.lock().raw
    }

    /// Size in bytes; zero for textures.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    pub(crate) fn snapshot(&self) -> Tracked {
        *self.inner.lock()
    }

    /// Swaps in new backing storage and returns the old one.
    pub(crate) fn replace(&self, raw: RawResource, state: ResourceState, size: u64) -> RawResource {
        let mut inner = self.inner.lock();
        let old = inner.raw;
        *inner = Tracked { raw, state, size };
        old
    }

    /// Makes the resource visible in `desired`, appending a transition to
    /// `stream` only when the current state does not already cover it.
    ///
    /// Returns the backing handle to use for the operation that follows.
    pub(crate) fn request(&self, desired: ResourceState, stream: &mut CommandStream) -> RawResource {
        let mut inner = self.inner.lock();
        if !inner.state.contains(&desired) {
            log::trace!("{}: {} -> {}", self.name, inner.state, desired);
            stream.push(Command::Transition(Transition {
                resource: inner.raw,
                before: inner.state,
                after: desired,
            }));
            inner.state = desired;
        }
        inner.raw
    }
}

/// Anything the recorders can transition.
pub trait GpuResource {
    fn tracked(&self) -> &TrackedResource;
}

impl GpuResource for TrackedResource {
    fn tracked(&self) -> &TrackedResource {
        self
    }
}

/// Tracker entry point; absent resources (an optional depth target, say) are skipped.
pub(crate) fn request_state(
    resource: Option<&TrackedResource>,
    desired: ResourceState,
    stream: &mut CommandStream,
) -> Option<RawResource> {
    resource.map(|resource| resource.request(desired, stream))
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;
    use crate::device::BufferKey;

    fn resource() -> TrackedResource {
        let mut keys: SlotMap<BufferKey, ()> = SlotMap::with_key();
        TrackedResource::new("test", RawResource::Buffer(keys.insert(())), 64)
    }

    #[test]
    fn repeated_request_emits_one_transition() {
        let res = resource();
        let mut stream = CommandStream::default();

        res.request(ResourceState::COPY_DST, &mut stream);
        res.request(ResourceState::COPY_DST, &mut stream);

        assert_eq!(stream.transitions().count(), 1);
        assert_eq!(res.state(), ResourceState::COPY_DST);
    }

    #[test]
    fn undefined_then_a_then_b() {
        let res = resource();
        let mut stream = CommandStream::default();

        res.request(ResourceState::SHADER_RESOURCE, &mut stream);
        res.request(ResourceState::SHADER_RESOURCE, &mut stream);
        res.request(ResourceState::UNORDERED_ACCESS, &mut stream);

        let transitions: Vec<_> = stream.transitions().collect();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].before, ResourceState::UNDEFINED);
        assert_eq!(transitions[0].after, ResourceState::SHADER_RESOURCE);
        assert_eq!(transitions[1].before, ResourceState::SHADER_RESOURCE);
        assert_eq!(transitions[1].after, ResourceState::UNORDERED_ACCESS);
    }

    #[test]
    fn absent_resource_is_skipped() {
        let mut stream = CommandStream::default();
        assert!(request_state(None, ResourceState::DEPTH_WRITE, &mut stream).is_none());
        assert!(stream.is_empty());
    }

    #[test]
    fn replace_resets_state_and_returns_old_handle() {
        let res = resource();
        let mut stream = CommandStream::default();
        let first = res.request(ResourceState::COPY_SRC, &mut stream);

        let mut keys: SlotMap<BufferKey, ()> = SlotMap::with_key();
        let next = RawResource::Buffer(keys.insert(()));
        let old = res.replace(next, ResourceState::COPY_DST, 128);

        assert_eq!(old, first);
        assert_eq!(res.raw(), next);
        assert_eq!(res.size(), 128);
        assert_eq!(res.state(), ResourceState::COPY_DST);
    }
}
