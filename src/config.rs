use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::util::{env_parsed, parse_bool_flag, parse_token_list};

pub const DEFAULT_BASE_RENDER_FPS: f64 = 30.0;
pub const DEFAULT_BLOCK_RENDER_FPS: f64 = 10.0;
pub const DEFAULT_STRUCTURAL_KINDS: &[&str] = &["json", "chart", "flow", "workflow"];

const MIN_RENDER_FPS: f64 = 1.0;
const MAX_RENDER_FPS: f64 = 240.0;

const BASE_RENDER_FPS_ENV: &str = "FENCECAST_BASE_RENDER_FPS";
const BLOCK_RENDER_FPS_ENV: &str = "FENCECAST_BLOCK_RENDER_FPS";
const STREAMING_RENDER_ENV: &str = "FENCECAST_STREAMING_RENDER";
const STRUCTURAL_KINDS_ENV: &str = "FENCECAST_STRUCTURAL_KINDS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Flush cadence while the buffer holds only prose.
    pub base_render_fps: f64,
    /// Flush cadence once a fence marker has appeared in the buffer.
    pub block_render_fps: f64,
    /// When false only the terminal flush ever runs.
    pub enable_streaming_render: bool,
    /// Block kinds whose content gets a secondary structural parse.
    pub structural_kinds: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            base_render_fps: DEFAULT_BASE_RENDER_FPS,
            block_render_fps: DEFAULT_BLOCK_RENDER_FPS,
            enable_streaming_render: true,
            structural_kinds: DEFAULT_STRUCTURAL_KINDS
                .iter()
                .map(|kind| (*kind).to_string())
                .collect(),
        }
    }
}

impl RenderConfig {
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let base_render_fps = env_parsed::<f64>(BASE_RENDER_FPS_ENV)
            .map(clamp_fps)
            .unwrap_or(defaults.base_render_fps);
        let block_render_fps = env_parsed::<f64>(BLOCK_RENDER_FPS_ENV)
            .map(clamp_fps)
            .unwrap_or(defaults.block_render_fps);
        let enable_streaming_render = std::env::var(STREAMING_RENDER_ENV)
            .ok()
            .and_then(parse_bool_flag)
            .unwrap_or(defaults.enable_streaming_render);
        let structural_kinds = std::env::var(STRUCTURAL_KINDS_ENV)
            .ok()
            .map(|v| parse_token_list(&v))
            .filter(|kinds| !kinds.is_empty())
            .unwrap_or(defaults.structural_kinds);

        Ok(Self {
            base_render_fps,
            block_render_fps,
            enable_streaming_render,
            structural_kinds,
        })
    }

    pub fn validate(&self) -> Result<()> {
        for (name, fps) in [
            ("base_render_fps", self.base_render_fps),
            ("block_render_fps", self.block_render_fps),
        ] {
            if !fps.is_finite() || fps <= 0.0 {
                bail!("Invalid {name} '{fps}': expected a positive frame rate");
            }
        }

        if self.structural_kinds.is_empty() {
            bail!("structural_kinds must name at least one block kind");
        }

        Ok(())
    }

    pub fn base_interval(&self) -> Duration {
        interval_for_fps(self.base_render_fps)
    }

    pub fn block_interval(&self) -> Duration {
        interval_for_fps(self.block_render_fps)
    }

    pub fn is_structural_kind(&self, kind: &str) -> bool {
        self.structural_kinds
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(kind))
    }
}

fn clamp_fps(fps: f64) -> f64 {
    if fps.is_finite() {
        fps.clamp(MIN_RENDER_FPS, MAX_RENDER_FPS)
    } else {
        DEFAULT_BASE_RENDER_FPS
    }
}

fn interval_for_fps(fps: f64) -> Duration {
    Duration::from_secs_f64(1.0 / clamp_fps(fps))
}
