// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::path::PathBuf;

use crate::geometry::MeshKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentPreference {
    /// Low-latency triple buffering when the surface offers it, else FIFO.
    #[default]
    Mailbox,
    Fifo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    #[default]
    Off,
    /// Depth attachment cleared to 1.0, LESS comparison.
    Less,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Winding {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// 8-bit sRGB; converted to linear before clearing.
    pub clear_color: [u8; 3],
    pub present_mode: PresentPreference,
    pub depth: DepthMode,
    pub front_face: Winding,
    pub mesh: MeshKind,
    pub validation: bool,
    pub require_geometry_shader: bool,
    /// Directory holding `cube.vert.spv` / `cube.frag.spv`.
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_color: [129, 186, 219],
            present_mode: PresentPreference::Mailbox,
            depth: DepthMode::Off,
            front_face: Winding::CounterClockwise,
            mesh: MeshKind::Cube,
            validation: cfg!(debug_assertions),
            require_geometry_shader: true,
            shader_dir: None,
        }
    }
}

impl RenderSettings {
    pub fn clear_color_linear(&self) -> [f32; 4] {
        prism_math::srgb8_to_linear(self.clear_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_sandbox() {
        let s = RenderSettings::default();
        assert_eq!(s.clear_color, [129, 186, 219]);
        assert_eq!(s.present_mode, PresentPreference::Mailbox);
        assert_eq!(s.depth, DepthMode::Off);
        assert_eq!(s.front_face, Winding::CounterClockwise);
        assert_eq!(s.mesh, MeshKind::Cube);
        assert!(s.require_geometry_shader);
        assert!(s.shader_dir.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let s: RenderSettings = toml::from_str(
            r#"
            depth = "less"
            front_face = "clockwise"
            shader_dir = "build/shaders"
            "#,
        )
        .unwrap();
        assert_eq!(s.depth, DepthMode::Less);
        assert_eq!(s.front_face, Winding::Clockwise);
        assert_eq!(s.shader_dir, Some(PathBuf::from("build/shaders")));
        assert_eq!(s.present_mode, PresentPreference::Mailbox);
        assert_eq!(s.clear_color, [129, 186, 219]);
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let r: Result<RenderSettings, _> = toml::from_str(r#"present_mode = "immediate""#);
        assert!(r.is_err());
    }

    #[test]
    fn clear_color_is_linearised() {
        let s = RenderSettings {
            clear_color: [255, 0, 255],
            ..Default::default()
        };
        let c = s.clear_color_linear();
        assert!((c[0] - 1.0).abs() < 1e-6);
        assert_eq!(c[1], 0.0);
        assert_eq!(c[3], 1.0);
    }
}
