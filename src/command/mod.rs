mod pipeline;
mod recorder;
mod stream;
pub(crate) mod upload;

pub use pipeline::{
    BindPoint, BindingKind, CommandSignature, IndirectKind, PipelineDesc, PipelineKey,
    PipelineKind, PipelineState,
};
pub use recorder::CommandRecorder;
pub use stream::{Command, CommandStream, ResourceView, Transition, ViewKind};
pub use upload::Staged;
