use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;
use web_sys::{AnalyserNode, AudioContext, HtmlAudioElement, MediaElementAudioSourceNode};

use crate::error::AudioError;

use super::{meter::DEFAULT_WINDOW, LevelMeter, Meter};

fn web_error(e: JsValue) -> AudioError {
    AudioError::Web(format!("{e:?}"))
}

/// Looping `<audio>` playback routed through an analyser for metering.
///
/// Has to be created from a user gesture or the browser keeps it muted.
pub struct WebAudioPlayer {
    _ctx: AudioContext,
    _element: HtmlAudioElement,
    _source: MediaElementAudioSourceNode,
    analyser: AnalyserNode,
    scratch: Vec<f32>,
    meter: Meter,
}

impl WebAudioPlayer {
    pub fn start(path: &str, smoothing: f32) -> Result<Self, AudioError> {
        let ctx = AudioContext::new().map_err(web_error)?;
        let element = HtmlAudioElement::new_with_src(path).map_err(web_error)?;
        element.set_loop(true);

        let source = ctx.create_media_element_source(&element).map_err(web_error)?;
        let analyser = ctx.create_analyser().map_err(web_error)?;
        analyser.set_fft_size(DEFAULT_WINDOW as u32);
        source.connect_with_audio_node(&analyser).map_err(web_error)?;
        analyser
            .connect_with_audio_node(&ctx.destination())
            .map_err(web_error)?;

        let resume = ctx.resume().map_err(web_error)?;
        let play = element.play().map_err(web_error)?;
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(e) = JsFuture::from(resume).await {
                tracing::error!("audio context did not resume: {e:?}");
            }
            if let Err(e) = JsFuture::from(play).await {
                tracing::error!("audio playback refused: {e:?}");
            }
        });

        Ok(Self {
            _ctx: ctx,
            _element: element,
            _source: source,
            analyser,
            scratch: vec![0.0; DEFAULT_WINDOW],
            meter: Meter::new(smoothing),
        })
    }
}

impl LevelMeter for WebAudioPlayer {
    fn current_level(&mut self) -> f32 {
        self.analyser.get_float_time_domain_data(&mut self.scratch);
        self.meter.push_samples(&self.scratch);
        self.meter.level()
    }
}
