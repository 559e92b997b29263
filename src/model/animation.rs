//! Keyframe animation: clips of per-node tracks, and mixers that play them.
//!
//! A mixer is bound to one model. Each `update(dt, model)` advances every
//! playing action by `dt`, wraps it over the clip duration and writes the
//! sampled pose back into the model's nodes.

use std::sync::Arc;

use glam::{Quat, Vec3};

use super::scene::{Model, ModelId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Step,
}

#[derive(Debug, Clone)]
pub enum TrackValues {
    Translation(Vec<Vec3>),
    Rotation(Vec<Quat>),
    Scale(Vec<Vec3>),
    /// `per_key` weights for each key, flattened.
    Weights { values: Vec<f32>, per_key: usize },
}

#[derive(Debug, Clone)]
pub struct KeyframeTrack {
    pub node: usize,
    pub times: Vec<f32>,
    pub values: TrackValues,
    pub interpolation: Interpolation,
}

/// Index of the key at or before `t` and the blend factor towards the next key.
/// Times before the first key clamp to it, times after the last clamp to the last.
fn locate(times: &[f32], t: f32, interpolation: Interpolation) -> (usize, usize, f32) {
    let last = times.len() - 1;
    if t <= times[0] {
        return (0, 0, 0.0);
    }
    if t >= times[last] {
        return (last, last, 0.0);
    }
    let next = times.partition_point(|&k| k <= t);
    let prev = next - 1;
    let span = times[next] - times[prev];
    let f = match interpolation {
        Interpolation::Step => 0.0,
        Interpolation::Linear if span > 0.0 => (t - times[prev]) / span,
        Interpolation::Linear => 0.0,
    };
    (prev, next, f)
}

impl KeyframeTrack {
    pub fn duration(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// Write this track's value at time `t` into `model`.
    pub fn apply(&self, t: f32, model: &mut Model) {
        if self.times.is_empty() {
            return;
        }
        let Some(node) = model.nodes.get_mut(self.node) else {
            return;
        };
        let (a, b, f) = locate(&self.times, t, self.interpolation);
        match &self.values {
            TrackValues::Translation(v) => {
                if let (Some(x), Some(y)) = (v.get(a), v.get(b)) {
                    node.translation = x.lerp(*y, f);
                }
            }
            TrackValues::Rotation(v) => {
                if let (Some(x), Some(y)) = (v.get(a), v.get(b)) {
                    node.rotation = x.slerp(*y, f).normalize();
                }
            }
            TrackValues::Scale(v) => {
                if let (Some(x), Some(y)) = (v.get(a), v.get(b)) {
                    node.scale = x.lerp(*y, f);
                }
            }
            TrackValues::Weights { values, per_key } => {
                let n = *per_key;
                let (Some(x), Some(y)) = (
                    values.get(a * n..(a + 1) * n),
                    values.get(b * n..(b + 1) * n),
                ) else {
                    return;
                };
                node.weights.resize(n, 0.0);
                for (w, (x, y)) in node.weights.iter_mut().zip(x.iter().zip(y)) {
                    *w = x + (y - x) * f;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<KeyframeTrack>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, tracks: Vec<KeyframeTrack>) -> Self {
        let duration = tracks.iter().map(KeyframeTrack::duration).fold(0.0, f32::max);
        Self {
            name: name.into(),
            duration,
            tracks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionId(usize);

/// One clip scheduled on a mixer; loops forever once playing.
#[derive(Debug, Clone)]
pub struct ClipAction {
    clip: Arc<AnimationClip>,
    time: f32,
    playing: bool,
}

impl ClipAction {
    /// Local time inside the clip, in `[0, duration)`.
    pub fn time(&self) -> f32 {
        self.time
    }
}

#[derive(Debug, Clone)]
pub struct AnimationMixer {
    target: ModelId,
    time: f32,
    actions: Vec<ClipAction>,
}

impl AnimationMixer {
    pub fn new(target: ModelId) -> Self {
        Self {
            target,
            time: 0.0,
            actions: Vec::new(),
        }
    }

    pub fn target(&self) -> ModelId {
        self.target
    }

    /// Total time this mixer has been advanced by.
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Action for `clip`, created on first request.
    pub fn clip_action(&mut self, clip: Arc<AnimationClip>) -> ActionId {
        if let Some(i) = self.actions.iter().position(|a| Arc::ptr_eq(&a.clip, &clip)) {
            return ActionId(i);
        }
        self.actions.push(ClipAction {
            clip,
            time: 0.0,
            playing: false,
        });
        ActionId(self.actions.len() - 1)
    }

    pub fn play(&mut self, id: ActionId) {
        if let Some(action) = self.actions.get_mut(id.0) {
            action.playing = true;
        }
    }

    pub fn action(&self, id: ActionId) -> Option<&ClipAction> {
        self.actions.get(id.0)
    }

    pub fn update(&mut self, dt: f32, model: &mut Model) {
        self.time += dt;
        for action in self.actions.iter_mut().filter(|a| a.playing) {
            let duration = action.clip.duration;
            action.time = if duration > 0.0 {
                (action.time + dt).rem_euclid(duration)
            } else {
                0.0
            };
            for track in &action.clip.tracks {
                track.apply(action.time, model);
            }
        }
    }
}
