// CONTROLLER: Clock, camera control and the frame loop
pub mod clock;
pub mod orbit;
pub mod frame_loop;

pub use clock::{Clock, ManualTime, TimeSource};
pub use orbit::{CameraControl, OrbitController};
pub use frame_loop::{FrameLoopContext, ModelLatch, SceneRenderer};
