use std::ops::ControlFlow;
use std::sync::Arc;

use glam::Vec3;

use crate::assets::{LoadEvent, LoadedModel, Receiver};
use crate::audio::LevelMeter;
use crate::config::{LevelMapping, ModelRole, ModelSpec, StageConfig};
use crate::error::ConfigError;
use crate::model::{AnimationMixer, Camera, ModelId, Scene};

use super::clock::Clock;
use super::orbit::CameraControl;

/// Draws the scene. Called once per frame whether or not the fixed step ran.
pub trait SceneRenderer {
    fn render(&mut self, scene: &Scene, camera: &Camera);
}

/// One-way latch: set once the audio-reactive model is in the scene.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelLatch(bool);

impl ModelLatch {
    pub fn arm(&mut self) {
        self.0 = true;
    }

    pub fn is_armed(&self) -> bool {
        self.0
    }
}

/// Stage state and per-frame update logic
pub struct FrameLoopContext {
    pub scene: Scene,
    pub camera: Camera,
    controls: Box<dyn CameraControl>,
    meter: Box<dyn LevelMeter>,
    clock: Clock,
    delta: f32,
    interval: f32,
    mapping: LevelMapping,
    mixers: Vec<AnimationMixer>,
    model_loaded: ModelLatch,
    reactive_model: Option<ModelId>,
    loads: Receiver<LoadEvent>,
    running: bool,
}

impl FrameLoopContext {
    pub fn new(
        config: &StageConfig,
        camera: Camera,
        controls: impl CameraControl + 'static,
        meter: impl LevelMeter + 'static,
        clock: Clock,
        loads: Receiver<LoadEvent>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            scene: Scene::new(config),
            camera,
            controls: Box::new(controls),
            meter: Box::new(meter),
            clock,
            delta: 0.0,
            interval: config.interval,
            mapping: config.level_mapping,
            mixers: Vec::new(),
            model_loaded: ModelLatch::default(),
            reactive_model: None,
            loads,
            running: false,
        })
    }

    /// Time carried over towards the next fixed step, in seconds.
    pub fn accumulator(&self) -> f32 {
        self.delta
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    pub fn mixers(&self) -> &[AnimationMixer] {
        &self.mixers
    }

    pub fn is_armed(&self) -> bool {
        self.model_loaded.is_armed()
    }

    pub fn reactive_model(&self) -> Option<ModelId> {
        self.reactive_model
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn play(&mut self) {
        self.running = true;
    }

    /// Detach from the host: later frames do nothing and ask the host to stop calling.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Host per-frame entry point.
    pub fn frame(&mut self, renderer: &mut dyn SceneRenderer) -> ControlFlow<()> {
        if !self.running {
            return ControlFlow::Break(());
        }
        self.apply_load_events();
        self.update();
        renderer.render(&self.scene, &self.camera);
        ControlFlow::Continue(())
    }

    /// Fold finished loads into the stage. Returns how many events were handled.
    pub fn apply_load_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.loads.try_recv() {
            handled += 1;
            match event {
                LoadEvent::Progress { path, bytes } => {
                    tracing::debug!("{}: {} bytes received", path, bytes);
                }
                LoadEvent::Loaded { spec, model } => self.add_loaded(spec, model),
                LoadEvent::Failed { spec, error } => {
                    tracing::error!("could not load {}: {}", spec.path, error);
                }
            }
        }
        handled
    }

    fn add_loaded(&mut self, spec: ModelSpec, loaded: LoadedModel) {
        let LoadedModel { mut model, clips } = loaded;
        model.place(Vec3::from(spec.position), spec.scale);
        let id = self.scene.add_model(model);

        match spec.role {
            ModelRole::Animated => match clips.first() {
                Some(clip) => {
                    let mut mixer = AnimationMixer::new(id);
                    let action = mixer.clip_action(Arc::clone(clip));
                    mixer.play(action);
                    self.mixers.push(mixer);
                    tracing::info!("{} loaded, playing '{}'", spec.path, clip.name);
                }
                None => tracing::warn!("{} has no animation clips; shown static", spec.path),
            },
            ModelRole::AudioReactive => {
                if let Some(previous) = self.reactive_model.replace(id) {
                    tracing::warn!("{} replaces model {:?} as the audio target", spec.path, previous);
                }
                self.model_loaded.arm();
                tracing::info!("{} loaded, following the audio level", spec.path);
            }
        }
    }

    /// Advance one frame. Returns whether the fixed step ran.
    pub fn update(&mut self) -> bool {
        self.controls.update(&mut self.camera);

        self.delta += self.clock.get_delta();
        if self.delta < self.interval {
            return false;
        }

        // Mixers take the whole accumulated time, not the fixed interval
        for mixer in &mut self.mixers {
            if let Some(model) = self.scene.model_mut(mixer.target()) {
                mixer.update(self.delta, model);
            }
        }

        if self.model_loaded.is_armed() {
            if let Some(model) = self.reactive_model.and_then(|id| self.scene.model_mut(id)) {
                let level = self.meter.current_level();
                model.root_mut().translation.z = self.mapping.apply(level);
            }
        }

        self.delta %= self.interval;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::channel;
    use crate::config::map_linear;
    use crate::controller::clock::ManualTime;
    use crate::error::AssetError;
    use crate::model::animation::{AnimationClip, Interpolation, KeyframeTrack, TrackValues};
    use crate::model::scene::tests::two_node_model;
    use crossbeam_channel::Sender;
    use proptest::prelude::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct FixedLevel(Rc<Cell<f32>>);

    impl LevelMeter for FixedLevel {
        fn current_level(&mut self) -> f32 {
            self.0.get()
        }
    }

    #[derive(Default)]
    struct CountingControls {
        ticks: u32,
    }

    impl CameraControl for CountingControls {
        fn update(&mut self, _camera: &mut Camera) {
            self.ticks += 1;
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        frames: u32,
    }

    impl SceneRenderer for RecordingRenderer {
        fn render(&mut self, _scene: &Scene, _camera: &Camera) {
            self.frames += 1;
        }
    }

    struct Harness {
        ctx: FrameLoopContext,
        time: ManualTime,
        level: Rc<Cell<f32>>,
        controls: Rc<RefCell<CountingControls>>,
        tx: Sender<LoadEvent>,
    }

    fn harness() -> Harness {
        let time = ManualTime::new();
        let level = Rc::new(Cell::new(-60.0));
        let controls = Rc::new(RefCell::new(CountingControls::default()));
        let (tx, rx) = channel();
        let mut ctx = FrameLoopContext::new(
            &StageConfig::default(),
            Camera::new(800, 600),
            controls.clone(),
            FixedLevel(level.clone()),
            Clock::new(time.clone()),
            rx,
        )
        .unwrap();
        ctx.play();
        // Start the clock
        ctx.update();
        Harness { ctx, time, level, controls, tx }
    }

    fn spec(role: ModelRole) -> ModelSpec {
        ModelSpec {
            path: format!("{role:?}.glb"),
            role,
            position: [0.0, 0.0, 0.0],
            scale: 1.0,
        }
    }

    fn animated_model() -> LoadedModel {
        let clip = AnimationClip::new(
            "walk",
            vec![KeyframeTrack {
                node: 1,
                times: vec![0.0, 10.0],
                values: TrackValues::Translation(vec![Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)]),
                interpolation: Interpolation::Linear,
            }],
        );
        LoadedModel {
            model: two_node_model(),
            clips: vec![Arc::new(clip)],
        }
    }

    fn static_model() -> LoadedModel {
        LoadedModel {
            model: two_node_model(),
            clips: Vec::new(),
        }
    }

    fn step(h: &mut Harness, secs: f64) -> bool {
        h.time.advance_secs(secs);
        h.ctx.update()
    }

    fn robot_z(h: &Harness) -> f32 {
        let id = h.ctx.reactive_model().unwrap();
        h.ctx.scene.model(id).unwrap().position().z
    }

    #[test]
    fn level_maps_to_depth_without_clamping() {
        let m = LevelMapping::default();
        assert_eq!(m.apply(-60.0), 0.0);
        assert_eq!(m.apply(12.0), 4.0);
        assert!((m.apply(-24.0) - 2.0).abs() < 1e-6);
        assert!((m.apply(24.0) - 4.6667).abs() < 1e-4);
        assert!(m.apply(-100.0) < 0.0);
    }

    #[test]
    fn accumulates_until_interval_then_wraps() {
        let mut h = harness();
        h.tx.send(LoadEvent::Loaded { spec: spec(ModelRole::Animated), model: animated_model() })
            .unwrap();
        h.ctx.apply_load_events();

        assert!(!step(&mut h, 0.01));
        assert!(!step(&mut h, 0.02));
        assert!((h.ctx.accumulator() - 0.03).abs() < 1e-5);
        assert_eq!(h.ctx.mixers()[0].time(), 0.0);

        assert!(step(&mut h, 0.02));
        assert!((h.ctx.mixers()[0].time() - 0.05).abs() < 1e-5);
        assert!((h.ctx.accumulator() - 0.01).abs() < 1e-5);
    }

    #[test]
    fn mixers_advance_by_accumulated_time_not_interval() {
        let mut h = harness();
        h.tx.send(LoadEvent::Loaded { spec: spec(ModelRole::Animated), model: animated_model() })
            .unwrap();
        h.ctx.apply_load_events();

        assert!(step(&mut h, 0.1));
        assert!((h.ctx.mixers()[0].time() - 0.1).abs() < 1e-5);
        assert!((h.ctx.accumulator() - 0.02).abs() < 1e-5);

        let flamingo = h.ctx.scene.model(ModelId(0)).unwrap();
        assert!((flamingo.nodes[1].translation.x - 0.1).abs() < 1e-4);
    }

    #[test]
    fn zero_elapsed_time_changes_nothing_but_camera_and_render() {
        let mut h = harness();
        h.tx.send(LoadEvent::Loaded { spec: spec(ModelRole::Animated), model: animated_model() })
            .unwrap();
        h.tx.send(LoadEvent::Loaded { spec: spec(ModelRole::AudioReactive), model: static_model() })
            .unwrap();
        h.level.set(12.0);
        let mut renderer = RecordingRenderer::default();
        let ticks_before = h.controls.borrow().ticks;

        assert!(h.ctx.frame(&mut renderer).is_continue());
        assert!(h.ctx.frame(&mut renderer).is_continue());

        assert_eq!(renderer.frames, 2);
        assert_eq!(h.controls.borrow().ticks, ticks_before + 2);
        assert_eq!(h.ctx.mixers()[0].time(), 0.0);
        assert_eq!(robot_z(&h), 0.0);
        assert_eq!(h.ctx.accumulator(), 0.0);
    }

    #[test]
    fn no_position_update_before_model_is_loaded() {
        let mut h = harness();
        h.level.set(12.0);
        assert!(step(&mut h, 0.05));
        assert!(!h.ctx.is_armed());
        assert!(h.ctx.reactive_model().is_none());

        let mut model = static_model();
        model.model.root_mut().translation = Vec3::new(0.0, 0.0, 7.0);
        h.tx.send(LoadEvent::Loaded { spec: spec(ModelRole::AudioReactive), model }).unwrap();
        h.ctx.apply_load_events();
        assert!(h.ctx.is_armed());
        // place() puts the model at its configured position until the next step
        assert_eq!(robot_z(&h), 0.0);

        h.level.set(-24.0);
        assert!(step(&mut h, 0.04));
        assert!((robot_z(&h) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn robot_depth_follows_level_only_on_threshold_steps() {
        let mut h = harness();
        h.tx.send(LoadEvent::Loaded { spec: spec(ModelRole::AudioReactive), model: static_model() })
            .unwrap();
        h.ctx.apply_load_events();

        h.level.set(12.0);
        assert!(!step(&mut h, 0.01));
        assert_eq!(robot_z(&h), 0.0);

        assert!(step(&mut h, 0.035));
        assert!((robot_z(&h) - 4.0).abs() < 1e-5);

        h.level.set(24.0);
        assert!(step(&mut h, 0.05));
        assert!((robot_z(&h) - 4.6667).abs() < 1e-4);
    }

    #[test]
    fn mixer_set_only_grows() {
        let mut h = harness();
        h.tx.send(LoadEvent::Loaded { spec: spec(ModelRole::Animated), model: animated_model() })
            .unwrap();
        h.ctx.apply_load_events();
        assert!(step(&mut h, 0.05));
        h.tx.send(LoadEvent::Loaded { spec: spec(ModelRole::Animated), model: animated_model() })
            .unwrap();
        h.ctx.apply_load_events();
        assert_eq!(h.ctx.mixers().len(), 2);

        assert!(step(&mut h, 0.05));
        let times: Vec<f32> = h.ctx.mixers().iter().map(|m| m.time()).collect();
        // 0.01 carried over + 0.05 elapsed, applied to both
        assert!((times[0] - 0.11).abs() < 1e-4);
        assert!((times[1] - 0.06).abs() < 1e-4);
    }

    #[test]
    fn animated_model_without_clips_gets_no_mixer() {
        let mut h = harness();
        h.tx.send(LoadEvent::Loaded { spec: spec(ModelRole::Animated), model: static_model() })
            .unwrap();
        h.ctx.apply_load_events();
        assert!(h.ctx.mixers().is_empty());
        assert_eq!(h.ctx.scene.len(), 1);
        assert!(!h.ctx.is_armed());
    }

    #[test]
    fn failed_load_is_dropped_and_loop_carries_on() {
        let mut h = harness();
        h.tx.send(LoadEvent::Progress { path: "x.glb".into(), bytes: 10 }).unwrap();
        h.tx.send(LoadEvent::Failed {
            spec: spec(ModelRole::AudioReactive),
            error: AssetError::EmptyScene { path: "x.glb".into() },
        })
        .unwrap();
        assert_eq!(h.ctx.apply_load_events(), 2);
        assert!(h.ctx.scene.is_empty());
        assert!(!h.ctx.is_armed());

        let mut renderer = RecordingRenderer::default();
        h.time.advance_secs(0.05);
        assert!(h.ctx.frame(&mut renderer).is_continue());
        assert_eq!(renderer.frames, 1);
    }

    #[test]
    fn loaded_models_take_configured_placement() {
        let mut h = harness();
        let mut s = spec(ModelRole::Animated);
        s.position = [-7.5, 0.0, -10.0];
        s.scale = 0.125;
        h.tx.send(LoadEvent::Loaded { spec: s, model: animated_model() }).unwrap();
        h.ctx.apply_load_events();
        let model = h.ctx.scene.model(ModelId(0)).unwrap();
        assert_eq!(model.position(), Vec3::new(-7.5, 0.0, -10.0));
        assert_eq!(model.root().scale, Vec3::splat(0.125));
    }

    #[test]
    fn stop_detaches_from_host() {
        let mut h = harness();
        let mut renderer = RecordingRenderer::default();
        assert!(h.ctx.frame(&mut renderer).is_continue());
        h.ctx.stop();
        assert!(!h.ctx.is_running());
        h.time.advance_secs(1.0);
        assert!(h.ctx.frame(&mut renderer).is_break());
        assert_eq!(renderer.frames, 1);
        // Nothing was sampled while stopped
        assert_eq!(h.ctx.accumulator(), 0.0);
    }

    #[test]
    fn rejects_bad_interval() {
        let (_tx, rx) = channel();
        let config = StageConfig { interval: -1.0, ..StageConfig::default() };
        let result = FrameLoopContext::new(
            &config,
            Camera::new(1, 1),
            CountingControls::default(),
            FixedLevel(Rc::new(Cell::new(0.0))),
            Clock::new(ManualTime::new()),
            rx,
        );
        assert!(matches!(result, Err(ConfigError::InvalidInterval(_))));
    }

    proptest! {
        #[test]
        fn depth_is_the_linear_formula(level in -200.0f32..200.0) {
            let expected = (level + 60.0) * 4.0 / 72.0;
            let got = LevelMapping::default().apply(level);
            prop_assert!((got - expected).abs() < 1e-3);
            prop_assert_eq!(got, map_linear(level, -60.0, 12.0, 0.0, 4.0));
        }

        #[test]
        fn accumulator_stays_below_interval_after_each_step(
            deltas in proptest::collection::vec(0.0f64..0.2, 1..60)
        ) {
            let mut h = harness();
            let interval = h.ctx.interval();
            for d in deltas {
                let before = h.ctx.accumulator();
                let stepped = step(&mut h, d);
                let after = h.ctx.accumulator();
                if stepped {
                    prop_assert!(after >= 0.0 && after < interval);
                } else {
                    prop_assert!(after >= before);
                    prop_assert!(after < interval);
                }
            }
        }
    }
}
