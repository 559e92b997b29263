// Re-export all public modules so they can be used from main.rs
pub mod logging;
pub mod config;
pub mod error;

// MVC Architecture
pub mod model;
pub mod view;
pub mod controller;

pub mod assets;
pub mod audio;

#[cfg(target_arch = "wasm32")]
mod web_host {
    use std::cell::RefCell;
    use std::ops::ControlFlow;
    use std::rc::Rc;

    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::{prelude::wasm_bindgen, JsCast, JsValue};
    use web_sys::{Document, HtmlCanvasElement, MouseEvent, WheelEvent, Window};

    use crate::audio::{self, LevelMeter};
    use crate::config::StageConfig;
    use crate::controller::clock::PerformanceSource;
    use crate::controller::{Clock, FrameLoopContext, OrbitController};
    use crate::model::Camera;
    use crate::view::{GpuContext, StageRenderer};
    use crate::{assets, logging};

    thread_local! {
        static STAGE: RefCell<Option<Rc<RefCell<FrameLoopContext>>>> = const { RefCell::new(None) };
    }

    #[wasm_bindgen(start)]
    pub fn start() -> Result<(), JsValue> {
        logging::init();

        let window = web_sys::window().ok_or_else(|| js_error("no global `window`"))?;
        let document = window.document().ok_or_else(|| js_error("no document on window"))?;
        let button = document
            .get_element_by_id("startButton")
            .ok_or_else(|| js_error("no #startButton in the page"))?;

        // Audio has to start inside the click for the browser to allow it
        let on_click = Closure::once_into_js(move || {
            if let Some(overlay) = document.get_element_by_id("overlay") {
                overlay.remove();
            }
            let config = StageConfig::default();
            let meter = audio::start_or_silent(&config.audio.path, config.audio.smoothing);
            wasm_bindgen_futures::spawn_local(async move {
                if let Err(e) = setup_stage(window, document, config, meter).await {
                    tracing::error!("stage setup failed: {e:?}");
                }
            });
        });
        button.add_event_listener_with_callback("click", on_click.unchecked_ref())?;

        tracing::info!("waiting for #startButton");
        Ok(())
    }

    /// Stop the running stage. The animation-frame loop ends on its next tick.
    #[wasm_bindgen]
    pub fn stop() {
        STAGE.with(|stage| {
            if let Some(stage) = stage.borrow().as_ref() {
                stage.borrow_mut().stop();
            }
        });
    }

    async fn setup_stage(
        window: Window,
        document: Document,
        config: StageConfig,
        meter: Box<dyn LevelMeter>,
    ) -> Result<(), JsValue> {
        let (width, height) = viewport_size(&window);
        let canvas = init_canvas(&document, width, height)?;

        let gpu = GpuContext::new(&canvas, width, height)
            .await
            .map_err(|e| js_error(format!("GPU init failed: {e}")))?;

        let camera = Camera::from_config(&config.camera, width, height);
        let orbit = Rc::new(RefCell::new(OrbitController::new(&camera)));
        orbit.borrow_mut().enable_zoom = config.camera.enable_zoom;

        let (tx, rx) = assets::channel();
        for spec in &config.models {
            assets::spawn_load(spec.clone(), tx.clone());
        }

        let clock = Clock::new(PerformanceSource::new(&window));
        let mut stage = FrameLoopContext::new(&config, camera, orbit.clone(), meter, clock, rx)
            .map_err(|e| js_error(e.to_string()))?;
        let renderer = StageRenderer::new(gpu, &stage.scene);
        stage.play();

        let stage = Rc::new(RefCell::new(stage));
        let renderer = Rc::new(RefCell::new(renderer));
        STAGE.with(|slot| *slot.borrow_mut() = Some(stage.clone()));

        setup_resize_listener(&window, &canvas, stage.clone(), renderer.clone())?;
        setup_input_listeners(&window, &canvas, orbit)?;

        RafLoop::new(window, move || stage.borrow_mut().frame(&mut *renderer.borrow_mut())).start()
    }

    fn setup_resize_listener(
        window: &Window,
        canvas: &HtmlCanvasElement,
        stage: Rc<RefCell<FrameLoopContext>>,
        renderer: Rc<RefCell<StageRenderer>>,
    ) -> Result<(), JsValue> {
        let window_for_size = window.clone();
        let canvas = canvas.clone();
        let on_resize = Closure::wrap(Box::new(move || {
            let (width, height) = viewport_size(&window_for_size);
            canvas.set_width(width);
            canvas.set_height(height);
            renderer.borrow_mut().resize(width, height);
            stage.borrow_mut().camera.set_aspect(width, height);
        }) as Box<dyn FnMut()>);
        window.add_event_listener_with_callback("resize", on_resize.as_ref().unchecked_ref())?;
        on_resize.forget();
        Ok(())
    }

    /// Drag on the canvas orbits, the wheel zooms.
    fn setup_input_listeners(
        window: &Window,
        canvas: &HtmlCanvasElement,
        orbit: Rc<RefCell<OrbitController>>,
    ) -> Result<(), JsValue> {
        // Mouse down on the canvas starts a drag
        {
            let orbit = orbit.clone();
            let mousedown = Closure::wrap(Box::new(move |e: MouseEvent| {
                if e.button() == 0 {
                    orbit.borrow_mut().begin_drag();
                    e.prevent_default();
                }
            }) as Box<dyn FnMut(MouseEvent)>);
            canvas.add_event_listener_with_callback("mousedown", mousedown.as_ref().unchecked_ref())?;
            mousedown.forget();
        }

        // Mouse up anywhere ends it
        {
            let orbit = orbit.clone();
            let mouseup = Closure::wrap(Box::new(move |e: MouseEvent| {
                if e.button() == 0 {
                    orbit.borrow_mut().end_drag();
                }
            }) as Box<dyn FnMut(MouseEvent)>);
            window.add_event_listener_with_callback("mouseup", mouseup.as_ref().unchecked_ref())?;
            mouseup.forget();
        }

        // Mouse move
        {
            let orbit = orbit.clone();
            let canvas_for_height = canvas.clone();
            let mousemove = Closure::wrap(Box::new(move |e: MouseEvent| {
                let mut orbit = orbit.borrow_mut();
                if orbit.is_dragging() {
                    orbit.drag(
                        e.movement_x() as f32,
                        e.movement_y() as f32,
                        canvas_for_height.client_height() as f32,
                    );
                }
            }) as Box<dyn FnMut(MouseEvent)>);
            window.add_event_listener_with_callback("mousemove", mousemove.as_ref().unchecked_ref())?;
            mousemove.forget();
        }

        // Mouse wheel
        {
            let wheel = Closure::wrap(Box::new(move |e: WheelEvent| {
                orbit.borrow_mut().zoom(e.delta_y() as f32);
                e.prevent_default();
            }) as Box<dyn FnMut(WheelEvent)>);
            canvas.add_event_listener_with_callback("wheel", wheel.as_ref().unchecked_ref())?;
            wheel.forget();
        }

        Ok(())
    }

    fn viewport_size(window: &Window) -> (u32, u32) {
        let width = window.inner_width().ok().and_then(|v| v.as_f64()).unwrap_or(800.0);
        let height = window.inner_height().ok().and_then(|v| v.as_f64()).unwrap_or(600.0);
        (width.max(1.0) as u32, height.max(1.0) as u32)
    }

    fn init_canvas(document: &Document, width: u32, height: u32) -> Result<HtmlCanvasElement, JsValue> {
        let body = document.body().ok_or_else(|| js_error("no body on document"))?;
        let canvas_el = document
            .create_element("canvas")?
            .dyn_into::<HtmlCanvasElement>()
            .map_err(|_| js_error("failed to create canvas"))?;
        canvas_el.set_width(width);
        canvas_el.set_height(height);
        body.append_child(&canvas_el)?;
        Ok(canvas_el)
    }

    fn js_error<E: Into<String>>(msg: E) -> JsValue {
        JsValue::from_str(&msg.into())
    }

    /// requestAnimationFrame loop that ends once the callback breaks.
    struct RafLoop {
        inner: Rc<RefCell<Box<dyn FnMut() -> ControlFlow<()>>>>,
        window: Window,
    }

    impl RafLoop {
        fn new(window: Window, f: impl FnMut() -> ControlFlow<()> + 'static) -> Self {
            Self {
                inner: Rc::new(RefCell::new(Box::new(f))),
                window,
            }
        }

        fn start(self) -> Result<(), JsValue> {
            let inner = self.inner.clone();
            let window = self.window.clone();

            let callback = Rc::new(RefCell::new(None::<Closure<dyn FnMut()>>));
            let callback_clone = callback.clone();

            *callback.borrow_mut() = Some(Closure::wrap(Box::new(move || {
                if inner.borrow_mut().as_mut()().is_break() {
                    tracing::info!("frame loop stopped");
                    return;
                }

                // Schedule next frame
                if let Some(cb) = callback_clone.borrow().as_ref() {
                    if let Err(e) = window.request_animation_frame(cb.as_ref().unchecked_ref()) {
                        tracing::error!("requestAnimationFrame failed: {e:?}");
                    }
                }
            }) as Box<dyn FnMut()>));

            if let Some(cb) = callback.borrow().as_ref() {
                self.window.request_animation_frame(cb.as_ref().unchecked_ref())?;
            }

            // Leak the closure to keep it alive
            std::mem::forget(callback);
            Ok(())
        }
    }
}
