use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;
use std::sync::Arc;

use winit::{
    event::*,
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

// Import from the library crate
use beatbot::{assets, audio, config, controller, logging, model, view};

use config::StageConfig;
use controller::clock::InstantSource;
use controller::{Clock, FrameLoopContext, OrbitController};
use model::Camera;
use view::{GpuContext, StageRenderer};

struct App {
    window: Arc<Window>,
    stage: FrameLoopContext,
    renderer: StageRenderer,
    orbit: Rc<RefCell<OrbitController>>,
    last_cursor: Option<(f64, f64)>,
}

impl App {
    async fn new(window: Arc<Window>, config: &StageConfig) -> Result<Self, Box<dyn Error>> {
        let size = window.inner_size();
        let gpu = GpuContext::new_native(window.clone(), size.width, size.height).await?;

        let camera = Camera::from_config(&config.camera, size.width, size.height);
        let orbit = Rc::new(RefCell::new(OrbitController::new(&camera)));
        orbit.borrow_mut().enable_zoom = config.camera.enable_zoom;

        let meter = audio::start_or_silent(&config.audio.path, config.audio.smoothing);

        let (tx, rx) = assets::channel();
        for spec in &config.models {
            assets::spawn_load(spec.clone(), tx.clone());
        }

        let clock = Clock::new(InstantSource::new());
        let mut stage = FrameLoopContext::new(config, camera, orbit.clone(), meter, clock, rx)?;
        let renderer = StageRenderer::new(gpu, &stage.scene);
        stage.play();

        Ok(Self {
            window,
            stage,
            renderer,
            orbit,
            last_cursor: None,
        })
    }

    /// Returns true when the window should close.
    fn input(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput {
                event: KeyEvent { state: ElementState::Pressed, physical_key: PhysicalKey::Code(KeyCode::Escape), .. },
                ..
            } => true,
            WindowEvent::MouseInput { state, button: MouseButton::Left, .. } => {
                match state {
                    ElementState::Pressed => self.orbit.borrow_mut().begin_drag(),
                    ElementState::Released => self.orbit.borrow_mut().end_drag(),
                }
                false
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Some((lx, ly)) = self.last_cursor {
                    let height = self.window.inner_size().height as f32;
                    self.orbit
                        .borrow_mut()
                        .drag((position.x - lx) as f32, (position.y - ly) as f32, height);
                }
                self.last_cursor = Some((position.x, position.y));
                false
            }
            WindowEvent::MouseWheel { delta, .. } => {
                // winit reports scrolling up as positive, the orbit zooms out on positive
                let dy = match delta {
                    MouseScrollDelta::LineDelta(_, y) => -*y,
                    MouseScrollDelta::PixelDelta(p) => -p.y as f32,
                };
                self.orbit.borrow_mut().zoom(dy);
                false
            }
            _ => false,
        }
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.renderer.resize(new_size.width, new_size.height);
            self.stage.camera.set_aspect(new_size.width, new_size.height);
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    logging::init();

    let config = StageConfig::load(&StageConfig::default_path())?;

    let event_loop = EventLoop::new()?;
    let window_attributes = Window::default_attributes()
        .with_title("beatbot")
        .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
    let window = Arc::new(event_loop.create_window(window_attributes)?);

    let mut app = pollster::block_on(App::new(window, &config))?;

    event_loop.run(move |event, elwt| {
        match event {
            Event::WindowEvent {
                ref event,
                window_id,
            } if window_id == app.window.id() => {
                if app.input(event) {
                    app.stage.stop();
                    elwt.exit();
                    return;
                }
                match event {
                    WindowEvent::CloseRequested => {
                        app.stage.stop();
                        elwt.exit();
                    }
                    WindowEvent::Resized(physical_size) => {
                        app.resize(*physical_size);
                    }
                    WindowEvent::RedrawRequested => {
                        if app.stage.frame(&mut app.renderer).is_break() {
                            tracing::info!("stage stopped, closing");
                            elwt.exit();
                        }
                    }
                    _ => {}
                }
            }
            Event::AboutToWait => {
                app.window.request_redraw();
            }
            _ => {}
        }
    })?;

    Ok(())
}
