use std::collections::HashMap;

use slotmap::new_key_type;

new_key_type! { pub struct PipelineKey; }

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// Shader register slot and space, as declared in the shader source.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct BindPoint {
    pub slot: u32,
    pub space: u32,
}

impl BindPoint {
    pub const fn new(slot: u32, space: u32) -> Self {
        Self { slot, space }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BindingKind {
    Constants,
    Constant,
    ShaderResource,
    UnorderedAccess,
}

/// Layout of a compiled pipeline: which root parameter backs each bind point.
///
/// Shader compilation happens elsewhere; this only carries what the recorder
/// needs to route bindings.
#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub name: String,
    pub kind: PipelineKind,
    bindings: HashMap<(BindingKind, BindPoint), u32>,
}

impl PipelineDesc {
    pub fn compute(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PipelineKind::Compute,
            bindings: HashMap::new(),
        }
    }

    pub fn graphics(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PipelineKind::Graphics,
            bindings: HashMap::new(),
        }
    }

    pub fn bind(mut self, kind: BindingKind, point: BindPoint, parameter: u32) -> Self {
        self.bindings.insert((kind, point), parameter);
        self
    }
}

#[derive(Debug)]
pub struct PipelineState {
    key: PipelineKey,
    desc: PipelineDesc,
}

impl PipelineState {
    pub(crate) fn new(key: PipelineKey, desc: PipelineDesc) -> Self {
        Self { key, desc }
    }

    pub fn key(&self) -> PipelineKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn kind(&self) -> PipelineKind {
        self.desc.kind
    }

    pub fn parameter(&self, kind: BindingKind, point: BindPoint) -> Option<u32> {
        self.desc.bindings.get(&(kind, point)).copied()
    }
}

/// Layout of the arguments consumed by indirect execution.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CommandSignature {
    pub kind: IndirectKind,
    pub stride: u32,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum IndirectKind {
    Draw,
    DrawIndexed,
    Dispatch,
    DispatchMesh,
}

impl CommandSignature {
    /// Tightly packed arguments of the given kind.
    pub fn packed(kind: IndirectKind) -> Self {
        let words = match kind {
            IndirectKind::Draw => 4,
            IndirectKind::DrawIndexed => 5,
            IndirectKind::Dispatch | IndirectKind::DispatchMesh => 3,
        };
        Self {
            kind,
            stride: words * 4,
        }
    }
}
