use std::path::PathBuf;

use thiserror::Error;

/// Failure to bring a model into the scene. Reported once, never retried.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch {path}: {reason}")]
    Fetch { path: String, reason: String },

    #[error("invalid glTF in {path}: {source}")]
    Gltf {
        path: String,
        #[source]
        source: gltf::Error,
    },

    #[error("{path} has no node to use as the model root")]
    EmptyScene { path: String },

    #[error("loader for {path} panicked: {message}")]
    LoaderPanic { path: String, message: String },
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to open audio file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode audio: {0}")]
    Decode(String),

    #[error("no usable audio output: {0}")]
    Output(String),

    #[error("web audio error: {0}")]
    Web(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("fixed interval must be positive and finite, got {0}")]
    InvalidInterval(f32),

    #[error("level mapping needs finite bounds and in_min != in_max, got {in_min}..{in_max} -> {out_min}..{out_max}")]
    InvalidLevelMapping {
        in_min: f32,
        in_max: f32,
        out_min: f32,
        out_max: f32,
    },
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("no suitable GPU adapter: {0}")]
    RequestAdapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to open GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("surface reports no supported formats")]
    NoSurfaceFormat,
}
