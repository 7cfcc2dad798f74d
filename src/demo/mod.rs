//! Three-thread mesh streaming demo: gameplay produces geometry, upload turns
//! it into meshes, render culls and draws them every frame.

mod engine;
mod gameplay;
mod messages;
mod render;
mod transfer;
mod upload;

pub use engine::Engine;
pub use transfer::stream_meshes;
