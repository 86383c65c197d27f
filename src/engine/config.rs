//! Engine settings, loaded from JSON. Every field has a default so a partial
//! file (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::camera::{ContentPlane, StereoCamera};
use crate::engine::math::ClipSpace;
use crate::engine::xr::ReferenceSpaceKind;
use crate::engine::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneConfig {
    /// Meters along view-forward.
    pub distance: f32,
    /// Meters.
    pub height: f32,
    /// width / height.
    pub aspect: f32,
    /// Linear RGBA of the flat quad.
    pub color: [f32; 4],
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            distance: 2.0,
            height: 1.8,
            aspect: 16.0 / 9.0,
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Texture size in pixels, `[width, height]`.
    pub size: [u32; 2],
    /// PNG/JPEG uploaded once as the texture contents.
    pub frame_path: Option<PathBuf>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            size: [1920, 1080],
            frame_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub app_name: String,
    pub near: f32,
    pub far: f32,
    pub plane: PlaneConfig,
    pub reference_space: ReferenceSpaceKind,
    /// Sleep between loop iterations while no session is running.
    pub idle_backoff_ms: u64,
    /// `None` waits on swapchain images without bound.
    pub image_wait_timeout_ms: Option<u64>,
    pub clear_color: [f32; 4],
    pub video: VideoConfig,
    pub frame_budget_ms: f64,
    /// Frames between timing reports; 0 disables them.
    pub stats_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "stereo-plane".to_string(),
            near: 0.1,
            far: 100.0,
            plane: PlaneConfig::default(),
            reference_space: ReferenceSpaceKind::View,
            idle_backoff_ms: 100,
            image_wait_timeout_ms: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            video: VideoConfig::default(),
            frame_budget_ms: 11.1,
            stats_interval: 900,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(self.near > 0.0 && self.far > self.near) {
            return Err(EngineError::Config(format!(
                "clip range must satisfy 0 < near < far (near={}, far={})",
                self.near, self.far
            )));
        }
        if self.plane.distance <= 0.0 || self.plane.height <= 0.0 || self.plane.aspect <= 0.0 {
            return Err(EngineError::Config("plane distance, height and aspect must be positive".into()));
        }
        if self.video.size.contains(&0) {
            return Err(EngineError::Config(format!("video size {:?} has a zero side", self.video.size)));
        }
        Ok(())
    }

    pub fn camera(&self) -> StereoCamera {
        StereoCamera {
            near: self.near,
            far: self.far,
            clip: ClipSpace::Vulkan,
            plane: ContentPlane {
                distance: self.plane.distance,
                height: self.plane.height,
                aspect: self.plane.aspect,
            },
        }
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn image_wait_timeout(&self) -> Option<Duration> {
        self.image_wait_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.image_wait_timeout(), None);
        assert_eq!(config.idle_backoff(), Duration::from_millis(100));
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "reference_space": "stage", "plane": { "distance": 3.5 }, "image_wait_timeout_ms": 50 }"#,
        )
        .unwrap();

        assert_eq!(config.reference_space, ReferenceSpaceKind::Stage);
        assert_eq!(config.plane.distance, 3.5);
        assert_eq!(config.plane.height, 1.8);
        assert_eq!(config.image_wait_timeout(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn camera_follows_plane_settings() {
        let mut config = EngineConfig::default();
        config.plane.distance = 4.0;
        config.far = 50.0;
        let camera = config.camera();
        assert_eq!(camera.plane.distance, 4.0);
        assert_eq!(camera.far, 50.0);
        assert_eq!(camera.clip, ClipSpace::Vulkan);
    }

    #[test]
    fn validate_rejects_bad_clip_range() {
        let config = EngineConfig {
            near: 10.0,
            far: 1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let path = std::env::temp_dir().join(format!("stereo_plane_bad_config_{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, EngineError::Config(ref msg) if msg.contains("stereo_plane_bad_config")));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = EngineConfig::load(Path::new("/nonexistent/stereo_plane.json")).unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
