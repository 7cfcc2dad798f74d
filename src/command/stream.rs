use smallvec::SmallVec;

use crate::{
    command::pipeline::{CommandSignature, PipelineKey, PipelineKind},
    device::{BufferKey, RawResource, TextureKey},
    state::ResourceState,
};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Transition {
    pub resource: RawResource,
    pub before: ResourceState,
    pub after: ResourceState,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ViewKind {
    Constant,
    ShaderResource,
    UnorderedAccess,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ResourceView {
    pub resource: RawResource,
    pub kind: ViewKind,
    pub mip: u32,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Command {
    Transition(Transition),
    UavBarrier(SmallVec<[RawResource; 4]>),
    CopyBuffer {
        src: BufferKey,
        src_offset: u64,
        dst: BufferKey,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        src: BufferKey,
        src_offset: u64,
        dst: TextureKey,
        mip: u32,
    },
    CopyTexture {
        src: TextureKey,
        dst: TextureKey,
    },
    ResolveTexture {
        src: TextureKey,
        dst: TextureKey,
    },
    SetPipeline {
        pipeline: PipelineKey,
        kind: PipelineKind,
    },
    SetConstants {
        parameter: u32,
        offset: u32,
        values: SmallVec<[u32; 16]>,
    },
    BindResource {
        parameter: u32,
        view: ResourceView,
    },
    SetIndexBuffer {
        buffer: BufferKey,
        size: u64,
    },
    SetRenderTargets {
        colors: SmallVec<[TextureKey; 8]>,
        depth: Option<TextureKey>,
        width: u32,
        height: u32,
    },
    ClearRenderTarget {
        target: TextureKey,
        color: [f32; 4],
    },
    ClearDepth {
        target: TextureKey,
        depth: f32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchMesh {
        x: u32,
        y: u32,
        z: u32,
    },
    ExecuteIndirect {
        signature: CommandSignature,
        arguments: BufferKey,
        offset: u64,
        max_count: u32,
        counter: Option<BufferKey>,
    },
    BeginEvent(String),
    EndEvent,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Transition(_) => "transition",
            Command::UavBarrier(_) => "uav barrier",
            Command::CopyBuffer { .. } => "copy buffer",
            Command::CopyBufferToTexture { .. } => "copy buffer to texture",
            Command::CopyTexture { .. } => "copy texture",
            Command::ResolveTexture { .. } => "resolve texture",
            Command::SetPipeline { .. } => "set pipeline",
            Command::SetConstants { .. } => "set constants",
            Command::BindResource { .. } => "bind resource",
            Command::SetIndexBuffer { .. } => "set index buffer",
            Command::SetRenderTargets { .. } => "set render targets",
            Command::ClearRenderTarget { .. } => "clear render target",
            Command::ClearDepth { .. } => "clear depth",
            Command::Dispatch { .. } => "dispatch",
            Command::DispatchMesh { .. } => "dispatch mesh",
            Command::ExecuteIndirect { .. } => "execute indirect",
            Command::BeginEvent(_) => "begin event",
            Command::EndEvent => "end event",
        }
    }
}

/// Ordered instructions recorded by one recorder, executed in append order.
#[derive(Default, Debug)]
pub struct CommandStream {
    commands: Vec<Command>,
}

impl CommandStream {
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> + '_ {
        self.commands.iter().filter_map(|c| match c {
            Command::Transition(t) => Some(t),
            _ => None,
        })
    }
}

impl<'a> IntoIterator for &'a CommandStream {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
