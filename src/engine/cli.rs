//! Command-line interface for stereo-plane.

use std::path::PathBuf;

use clap::Parser;

use crate::engine::xr::ReferenceSpaceKind;
use crate::engine::{EngineConfig, EngineResult};

#[derive(Debug, Parser)]
#[command(name = "stereo-plane", about = "Render a flat content plane to an OpenXR headset")]
pub struct Cli {
    /// JSON settings file; missing fields take their defaults.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run without a desktop window until the session ends.
    #[arg(long)]
    pub no_window: bool,

    /// PNG/JPEG uploaded into the video texture.
    #[arg(long, value_name = "PATH")]
    pub video_frame: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub reference_space: Option<ReferenceSpaceKind>,

    /// Meters from the viewer to the content plane.
    #[arg(long)]
    pub plane_distance: Option<f32>,

    #[arg(long)]
    pub idle_backoff_ms: Option<u64>,
}

impl Cli {
    /// Load the config file (or defaults) and apply flag overrides on top.
    pub fn into_config(self) -> EngineResult<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };

        if let Some(path) = self.video_frame {
            config.video.frame_path = Some(path);
        }
        if let Some(space) = self.reference_space {
            config.reference_space = space;
        }
        if let Some(distance) = self.plane_distance {
            config.plane.distance = distance;
        }
        if let Some(ms) = self.idle_backoff_ms {
            config.idle_backoff_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }
}
