// VIEW: Rendering and graphics
pub mod render;
pub mod gpu_init;

pub use render::StageRenderer;
pub use gpu_init::GpuContext;
