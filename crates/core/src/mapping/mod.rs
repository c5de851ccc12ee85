//! Video mapping configuration as exported by the show authoring tool.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, ShowSyncError};

/// Tolerance used to decide whether a control point moved from its rest
/// position.
pub const DEFORM_EPSILON: f64 = 0.001;

/// Normalized 2D point, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn in_unit_square(self, eps: f64) -> bool {
        (-eps..=1.0 + eps).contains(&self.x) && (-eps..=1.0 + eps).contains(&self.y)
    }

    fn moved_from(self, rest: Point2) -> bool {
        (self.x - rest.x).abs() > DEFORM_EPSILON || (self.y - rest.y).abs() > DEFORM_EPSILON
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// 8-bit RGBA colour, serialised as `#RRGGBB` or `#RRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const OPAQUE_BLACK: Rgba8 = Rgba8 {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };

    pub fn parse(value: &str) -> Result<Self> {
        let hex = value.trim().trim_start_matches('#');
        let channel = |i: usize| {
            hex.get(i..i + 2)
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| ShowSyncError::config(format!("invalid colour `{value}`")))
        };
        match hex.len() {
            6 => Ok(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: 255,
            }),
            8 => Ok(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: channel(6)?,
            }),
            _ => Err(ShowSyncError::config(format!("invalid colour `{value}`"))),
        }
    }
}

impl Default for Rgba8 {
    fn default() -> Self {
        Self::OPAQUE_BLACK
    }
}

impl fmt::Display for Rgba8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl TryFrom<String> for Rgba8 {
    type Error = ShowSyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Rgba8> for String {
    fn from(value: Rgba8) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingMode {
    #[default]
    Perspective,
    Mesh,
}

/// Destination corners of the unit square, in normalized output space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerspectivePoints {
    pub top_left: Point2,
    pub top_right: Point2,
    pub bottom_left: Point2,
    pub bottom_right: Point2,
}

impl Default for PerspectivePoints {
    fn default() -> Self {
        Self {
            top_left: Point2::new(0.0, 0.0),
            top_right: Point2::new(1.0, 0.0),
            bottom_left: Point2::new(0.0, 1.0),
            bottom_right: Point2::new(1.0, 1.0),
        }
    }
}

impl PerspectivePoints {
    /// Corners in `[TL, TR, BL, BR]` order.
    pub fn corners(&self) -> [Point2; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_left,
            self.bottom_right,
        ]
    }

    pub fn is_deformed(&self) -> bool {
        self.corners()
            .iter()
            .zip(Self::default().corners())
            .any(|(point, rest)| point.moved_from(rest))
    }
}

/// `(rows + 1) x (cols + 1)` grid of destination points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshGridConfig {
    pub rows: usize,
    pub cols: usize,
    #[serde(default)]
    pub points: Vec<Vec<Point2>>,
}

impl MeshGridConfig {
    /// Undeformed grid with evenly spaced points.
    pub fn regular(rows: usize, cols: usize) -> Self {
        let points = (0..=rows)
            .map(|r| {
                (0..=cols)
                    .map(|c| Self::rest_position(rows, cols, r, c))
                    .collect()
            })
            .collect();
        Self { rows, cols, points }
    }

    pub fn rest_position(rows: usize, cols: usize, row: usize, col: usize) -> Point2 {
        Point2::new(
            if cols > 0 { col as f64 / cols as f64 } else { 0.0 },
            if rows > 0 { row as f64 / rows as f64 } else { 0.0 },
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(ShowSyncError::config(format!(
                "mesh grid needs at least one cell, got {}x{}",
                self.rows, self.cols
            )));
        }
        if self.points.len() != self.rows + 1 {
            return Err(ShowSyncError::config(format!(
                "mesh grid has {} point rows, expected {}",
                self.points.len(),
                self.rows + 1
            )));
        }
        if let Some((index, row)) = self
            .points
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.cols + 1)
        {
            return Err(ShowSyncError::config(format!(
                "mesh grid row {index} has {} points, expected {}",
                row.len(),
                self.cols + 1
            )));
        }
        Ok(())
    }

    pub fn is_deformed(&self) -> bool {
        self.points.iter().enumerate().any(|(r, row)| {
            row.iter().enumerate().any(|(c, point)| {
                point.moved_from(Self::rest_position(self.rows, self.cols, r, c))
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendCurve {
    Linear,
    #[default]
    Quadratic,
    Cubic,
    Sine,
}

impl BlendCurve {
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::Quadratic => t * t,
            Self::Cubic => t * t * t,
            Self::Sine => (t * std::f64::consts::FRAC_PI_2).sin(),
        }
    }
}

/// Unit of the per-edge blend widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendUnits {
    #[default]
    Pixels,
    Normalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeWidths {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SoftEdgeConfig {
    pub enabled: bool,
    pub gamma: f64,
    pub blend_curve: BlendCurve,
    pub units: BlendUnits,
    pub individual_blend_widths: EdgeWidths,
}

impl Default for SoftEdgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gamma: 2.2,
            blend_curve: BlendCurve::Quadratic,
            units: BlendUnits::Pixels,
            individual_blend_widths: EdgeWidths::default(),
        }
    }
}

/// One mapping entry of the project: either the global display mapping or
/// a scene-specific one (`scene_id` set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoMappingConfig {
    pub enabled: bool,
    pub mode: MappingMode,
    pub perspective_points: PerspectivePoints,
    pub mesh_grid: Option<MeshGridConfig>,
    pub background_color: Rgba8,
    pub target_resolution: Option<Resolution>,
    pub soft_edge: Option<SoftEdgeConfig>,
    pub scene_id: Option<String>,
}

impl Default for VideoMappingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: MappingMode::Perspective,
            perspective_points: PerspectivePoints::default(),
            mesh_grid: None,
            background_color: Rgba8::OPAQUE_BLACK,
            target_resolution: None,
            soft_edge: None,
            scene_id: None,
        }
    }
}

impl VideoMappingConfig {
    pub fn perspective(points: PerspectivePoints) -> Self {
        Self {
            perspective_points: points,
            ..Self::default()
        }
    }

    pub fn mesh(grid: MeshGridConfig) -> Self {
        Self {
            mode: MappingMode::Mesh,
            mesh_grid: Some(grid),
            ..Self::default()
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.target_resolution.unwrap_or_default()
    }

    pub fn is_deformed(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match self.mode {
            MappingMode::Perspective => self.perspective_points.is_deformed(),
            MappingMode::Mesh => self
                .mesh_grid
                .as_ref()
                .map(MeshGridConfig::is_deformed)
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exported_perspective_mapping() {
        let json = r##"{
            "mode": "perspective",
            "perspectivePoints": {
                "topLeft": { "x": 0.05, "y": 0.0 },
                "topRight": { "x": 1.0, "y": 0.0 },
                "bottomLeft": { "x": 0.0, "y": 1.0 },
                "bottomRight": { "x": 1.0, "y": 1.0 }
            },
            "backgroundColor": "#102030",
            "targetResolution": { "width": 1280, "height": 720 }
        }"##;

        let config: VideoMappingConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.mode, MappingMode::Perspective);
        assert!(config.is_deformed());
        assert_eq!(
            config.background_color,
            Rgba8 {
                r: 0x10,
                g: 0x20,
                b: 0x30,
                a: 255
            }
        );
        assert_eq!(config.resolution().width, 1280);
    }

    #[test]
    fn parses_mesh_grid_and_soft_edge() {
        let json = r#"{
            "mode": "mesh",
            "meshGrid": { "rows": 1, "cols": 1, "points": [
                [{ "x": 0, "y": 0 }, { "x": 1, "y": 0 }],
                [{ "x": 0, "y": 1 }, { "x": 1, "y": 1 }]
            ]},
            "softEdge": {
                "enabled": true,
                "gamma": 1.8,
                "blendCurve": "sine",
                "individualBlendWidths": { "left": 192 }
            }
        }"#;

        let config: VideoMappingConfig = serde_json::from_str(json).unwrap();
        let grid = config.mesh_grid.as_ref().unwrap();
        assert!(grid.validate().is_ok());
        assert!(!config.is_deformed());

        let soft_edge = config.soft_edge.unwrap();
        assert_eq!(soft_edge.blend_curve, BlendCurve::Sine);
        assert_eq!(soft_edge.units, BlendUnits::Pixels);
        assert_eq!(soft_edge.individual_blend_widths.left, 192.0);
    }

    #[test]
    fn rejects_mesh_with_wrong_point_count() {
        let mut grid = MeshGridConfig::regular(2, 3);
        grid.points[1].pop();
        let err = grid.validate().unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn colour_round_trips_through_hex() {
        let colour = Rgba8::parse("#ff000080").unwrap();
        assert_eq!(colour.a, 0x80);
        assert_eq!(colour.to_string(), "#ff000080");
        assert!(Rgba8::parse("#abc").is_err());
    }

    #[test]
    fn blend_curves_hit_their_endpoints() {
        for curve in [
            BlendCurve::Linear,
            BlendCurve::Quadratic,
            BlendCurve::Cubic,
            BlendCurve::Sine,
        ] {
            assert!(curve.apply(0.0).abs() < 1e-12);
            assert!((curve.apply(1.0) - 1.0).abs() < 1e-12);
        }
        assert!((BlendCurve::Quadratic.apply(0.5) - 0.25).abs() < 1e-12);
    }
}
