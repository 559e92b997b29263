// MODEL: Scene data, camera and animation
pub mod camera;
pub mod scene;
pub mod animation;

pub use camera::Camera;
pub use scene::{Model, ModelId, Node, MeshData, MorphTarget, Scene};
pub use animation::{AnimationClip, AnimationMixer, KeyframeTrack, TrackValues, Interpolation};
