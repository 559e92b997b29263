use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};

use crate::error::AudioError;

use super::{LevelMeter, Meter};

/// Samples collected on the audio thread before taking the meter lock.
const TAP_BLOCK: usize = 512;

/// Looping file playback through the default output device.
///
/// Must stay on the thread that created it; dropping it stops playback.
pub struct AudioPlayer {
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    sink: Sink,
    meter: Arc<Mutex<Meter>>,
}

impl AudioPlayer {
    pub fn start(path: &str, smoothing: f32) -> Result<Self, AudioError> {
        let file = File::open(path).map_err(|source| AudioError::Io {
            path: PathBuf::from(path),
            source,
        })?;
        let decoder =
            Decoder::new(BufReader::new(file)).map_err(|e| AudioError::Decode(e.to_string()))?;

        let (stream, handle) =
            OutputStream::try_default().map_err(|e| AudioError::Output(e.to_string()))?;
        let sink = Sink::try_new(&handle).map_err(|e| AudioError::Output(e.to_string()))?;

        let meter = Arc::new(Mutex::new(Meter::new(smoothing)));
        let looped = decoder.convert_samples::<f32>().repeat_infinite();
        sink.append(MeterTap::new(looped, meter.clone()));
        sink.play();

        Ok(Self {
            _stream: stream,
            _handle: handle,
            sink,
            meter,
        })
    }
}

impl LevelMeter for AudioPlayer {
    fn current_level(&mut self) -> f32 {
        self.meter.lock().level()
    }
}

/// Pass-through source that copies every sample it yields into a [`Meter`].
pub struct MeterTap<S> {
    inner: S,
    block: Vec<f32>,
    meter: Arc<Mutex<Meter>>,
}

impl<S> MeterTap<S> {
    pub fn new(inner: S, meter: Arc<Mutex<Meter>>) -> Self {
        Self {
            inner,
            block: Vec::with_capacity(TAP_BLOCK),
            meter,
        }
    }

    fn flush(&mut self) {
        if !self.block.is_empty() {
            self.meter.lock().push_samples(&self.block);
            self.block.clear();
        }
    }
}

impl<S: Iterator<Item = f32>> Iterator for MeterTap<S> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.inner.next();
        match sample {
            Some(s) => {
                self.block.push(s);
                if self.block.len() >= TAP_BLOCK {
                    self.flush();
                }
            }
            None => self.flush(),
        }
        sample
    }
}

impl<S: Source<Item = f32>> Source for MeterTap<S> {
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}
