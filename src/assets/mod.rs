//! Model loading.
//!
//! Loads run off the frame loop (a thread natively, a `spawn_local` future on
//! the web) and report back over a channel. The loop drains the channel at the
//! start of each frame, so a load only ever touches stage state from the
//! loop's own thread.

pub mod import;

use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::config::ModelSpec;
use crate::error::AssetError;
use crate::model::{AnimationClip, Model};

pub use crossbeam_channel::{unbounded as channel, Receiver};

#[derive(Debug)]
pub struct LoadedModel {
    pub model: Model,
    pub clips: Vec<Arc<AnimationClip>>,
}

/// Messages from a load in flight. Each spawned load ends with exactly one
/// `Loaded` or `Failed`, after zero or more `Progress`.
pub enum LoadEvent {
    Progress { path: String, bytes: u64 },
    Loaded { spec: ModelSpec, model: LoadedModel },
    Failed { spec: ModelSpec, error: AssetError },
}

fn finish(tx: &Sender<LoadEvent>, spec: ModelSpec, result: Result<LoadedModel, AssetError>) {
    let event = match result {
        Ok(model) => LoadEvent::Loaded { spec, model },
        Err(error) => LoadEvent::Failed { spec, error },
    };
    // Receiver gone means the stage was torn down; nothing left to tell
    let _ = tx.send(event);
}

#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_load(spec: ModelSpec, tx: Sender<LoadEvent>) {
    spawn_load_with(spec, tx, import::load_path);
}

/// Text of a panic payload, when it carries one.
#[cfg(not(target_arch = "wasm32"))]
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn_load_with<F>(spec: ModelSpec, tx: Sender<LoadEvent>, load: F)
where
    F: FnOnce(&std::path::Path) -> Result<LoadedModel, AssetError> + Send + 'static,
{
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::path::PathBuf;

    let path = PathBuf::from(&spec.path);
    let thread_name = format!("load {}", spec.path);
    let spawned = std::thread::Builder::new().name(thread_name).spawn({
        let spec = spec.clone();
        let tx = tx.clone();
        move || {
            tracing::info!("loading {}", spec.path);
            let result = std::fs::metadata(&path)
                .map_err(|source| AssetError::Io {
                    path: path.clone(),
                    source,
                })
                .and_then(|meta| {
                    let _ = tx.send(LoadEvent::Progress {
                        path: spec.path.clone(),
                        bytes: meta.len(),
                    });
                    // A panicking importer still owes the stage its one terminal event
                    catch_unwind(AssertUnwindSafe(|| load(&path))).unwrap_or_else(|payload| {
                        Err(AssetError::LoaderPanic {
                            path: spec.path.clone(),
                            message: panic_message(payload.as_ref()),
                        })
                    })
                });
            finish(&tx, spec, result);
        }
    });
    if let Err(source) = spawned {
        finish(
            &tx,
            spec,
            Err(AssetError::Io {
                path: PathBuf::from("<loader thread>"),
                source,
            }),
        );
    }
}

#[cfg(target_arch = "wasm32")]
pub fn spawn_load(spec: ModelSpec, tx: Sender<LoadEvent>) {
    wasm_bindgen_futures::spawn_local(async move {
        tracing::info!("loading {}", spec.path);
        let result = match web::fetch_bytes(&spec.path).await {
            Ok(bytes) => {
                let _ = tx.send(LoadEvent::Progress {
                    path: spec.path.clone(),
                    bytes: bytes.len() as u64,
                });
                import::load_slice(&spec.path, &bytes)
            }
            Err(e) => Err(e),
        };
        finish(&tx, spec, result);
    });
}

#[cfg(target_arch = "wasm32")]
mod web {
    use wasm_bindgen::JsCast;
    use wasm_bindgen_futures::JsFuture;
    use web_sys::Response;

    use crate::error::AssetError;

    fn fetch_error(path: &str, reason: impl Into<String>) -> AssetError {
        AssetError::Fetch {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub async fn fetch_bytes(path: &str) -> Result<Vec<u8>, AssetError> {
        let window = web_sys::window().ok_or_else(|| fetch_error(path, "no global `window`"))?;
        let resp = JsFuture::from(window.fetch_with_str(path))
            .await
            .map_err(|e| fetch_error(path, format!("{e:?}")))?;
        let resp: Response = resp
            .dyn_into()
            .map_err(|_| fetch_error(path, "fetch did not return a Response"))?;
        if !resp.ok() {
            return Err(fetch_error(path, format!("HTTP {}", resp.status())));
        }
        let buf = resp
            .array_buffer()
            .map_err(|e| fetch_error(path, format!("{e:?}")))?;
        let buf = JsFuture::from(buf)
            .await
            .map_err(|e| fetch_error(path, format!("{e:?}")))?;
        Ok(js_sys::Uint8Array::new(&buf).to_vec())
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::config::ModelRole;
    use std::time::Duration;

    #[test]
    fn missing_file_reports_failure_once() {
        let (tx, rx) = channel();
        let spec = ModelSpec {
            path: "models/__missing__.glb".into(),
            role: ModelRole::Animated,
            position: [0.0; 3],
            scale: 1.0,
        };
        spawn_load(spec, tx);
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match event {
            LoadEvent::Failed { spec, error } => {
                assert_eq!(spec.path, "models/__missing__.glb");
                assert!(matches!(error, AssetError::Io { .. }));
            }
            _ => panic!("expected a failure event"),
        }
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn panicking_import_still_reports_failure_once() {
        let (tx, rx) = channel();
        let spec = ModelSpec {
            path: concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml").into(),
            role: ModelRole::AudioReactive,
            position: [0.0; 3],
            scale: 1.0,
        };
        spawn_load_with(spec, tx, |_| panic!("importer blew up"));

        let mut terminal = Vec::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
            match event {
                LoadEvent::Progress { .. } => {}
                other => terminal.push(other),
            }
        }
        assert_eq!(terminal.len(), 1);
        match &terminal[0] {
            LoadEvent::Failed { error: AssetError::LoaderPanic { message, .. }, .. } => {
                assert_eq!(message, "importer blew up");
            }
            _ => panic!("expected a loader panic failure"),
        }
    }
}
