//! Geometric video warping. Compiled mappings are immutable and shared
//! behind an `Arc`, so a frame holding the previous mapping finishes with it.

mod homography;
mod mesh;
mod soft_edge;

use std::sync::Arc;

pub use homography::{Homography, UNIT_SQUARE};
pub use mesh::MeshWarp;
pub use soft_edge::{SoftEdge, MAX_EDGE_FRACTION};

use crate::mapping::{MappingMode, Point2, Resolution, Rgba8, VideoMappingConfig};
use crate::{Result, ShowSyncError};

/// Slack allowed when checking that an inverse-mapped point landed on the
/// source frame.
const SOURCE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum WarpTransform {
    Identity,
    Perspective {
        forward: Homography,
        inverse: Homography,
    },
    Mesh(MeshWarp),
}

impl WarpTransform {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Perspective { .. } => "perspective",
            Self::Mesh(_) => "mesh",
        }
    }

    /// Source UV to output position.
    pub fn forward(&self, uv: Point2) -> Option<Point2> {
        match self {
            Self::Identity => Some(uv),
            Self::Perspective { forward, .. } => forward.apply(uv),
            Self::Mesh(mesh) => mesh.forward(uv),
        }
    }

    /// Output position to source UV.
    pub fn inverse(&self, p: Point2) -> Option<Point2> {
        match self {
            Self::Identity => Some(p),
            Self::Perspective { inverse, .. } => inverse.apply(p),
            Self::Mesh(mesh) => mesh.inverse(p),
        }
    }
}

/// What an output pixel shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PixelSample {
    /// Outside the mapped area.
    Background(Rgba8),
    Source { uv: Point2, alpha: f64 },
}

/// Per-pixel lookup for the video rendering path, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapTable {
    pub width: u32,
    pub height: u32,
    pub entries: Vec<PixelSample>,
}

impl RemapTable {
    pub fn get(&self, x: u32, y: u32) -> Option<&PixelSample> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.entries.get(y as usize * self.width as usize + x as usize)
    }

    pub fn mapped_pixels(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, PixelSample::Source { .. }))
            .count()
    }
}

#[derive(Debug)]
pub struct CompiledMapping {
    config: Option<VideoMappingConfig>,
    transform: WarpTransform,
    soft_edge: Option<SoftEdge>,
    background: Rgba8,
    resolution: Resolution,
    faults: Vec<ShowSyncError>,
}

impl CompiledMapping {
    pub fn identity() -> Self {
        Self {
            config: None,
            transform: WarpTransform::Identity,
            soft_edge: None,
            background: Rgba8::OPAQUE_BLACK,
            resolution: Resolution::default(),
            faults: Vec::new(),
        }
    }

    /// Solves the transform for `config`. Malformed geometry is an error;
    /// soft-edge values that could be corrected are kept in [`Self::faults`].
    pub fn compile(config: &VideoMappingConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self {
                config: Some(config.clone()),
                ..Self::identity()
            });
        }

        let transform = match config.mode {
            MappingMode::Perspective if config.perspective_points.is_deformed() => {
                let forward = Homography::from_unit_square(&config.perspective_points.corners())?;
                let inverse = forward.inverse()?;
                WarpTransform::Perspective { forward, inverse }
            }
            MappingMode::Perspective => WarpTransform::Identity,
            MappingMode::Mesh => match &config.mesh_grid {
                Some(grid) => {
                    grid.validate()?;
                    if grid.is_deformed() {
                        WarpTransform::Mesh(MeshWarp::build(grid)?)
                    } else {
                        WarpTransform::Identity
                    }
                }
                None => {
                    return Err(ShowSyncError::config("mesh mapping has no meshGrid"));
                }
            },
        };

        let resolution = config.resolution();
        let mut faults = Vec::new();
        let soft_edge = config
            .soft_edge
            .as_ref()
            .filter(|soft_edge| soft_edge.enabled)
            .map(|soft_edge| {
                let (compiled, mut found) = SoftEdge::compile(soft_edge, resolution);
                faults.append(&mut found);
                compiled
            })
            .filter(|soft_edge| !soft_edge.is_noop());

        for fault in &faults {
            tracing::warn!(error = %fault, "mapping compiled with corrections");
        }

        Ok(Self {
            config: Some(config.clone()),
            transform,
            soft_edge,
            background: config.background_color,
            resolution,
            faults,
        })
    }

    pub fn config(&self) -> Option<&VideoMappingConfig> {
        self.config.as_ref()
    }

    pub fn transform(&self) -> &WarpTransform {
        &self.transform
    }

    pub fn soft_edge(&self) -> Option<&SoftEdge> {
        self.soft_edge.as_ref()
    }

    pub fn background(&self) -> Rgba8 {
        self.background
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn faults(&self) -> &[ShowSyncError] {
        &self.faults
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.transform, WarpTransform::Identity) && self.soft_edge.is_none()
    }

    /// Samples a normalized output position.
    pub fn sample(&self, p: Point2) -> PixelSample {
        match self.transform.inverse(p) {
            Some(uv) if uv.in_unit_square(SOURCE_EPSILON) => {
                let uv = Point2::new(uv.x.clamp(0.0, 1.0), uv.y.clamp(0.0, 1.0));
                let alpha = self
                    .soft_edge
                    .as_ref()
                    .map(|soft_edge| soft_edge.alpha(uv))
                    .unwrap_or(1.0);
                PixelSample::Source { uv, alpha }
            }
            _ => PixelSample::Background(self.background),
        }
    }

    /// Remap table sampled at pixel centres of `resolution`.
    pub fn remap_table(&self, resolution: Resolution) -> RemapTable {
        let (width, height) = (resolution.width, resolution.height);
        let mut entries = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let p = Point2::new(
                    (f64::from(x) + 0.5) / f64::from(width),
                    (f64::from(y) + 0.5) / f64::from(height),
                );
                entries.push(self.sample(p));
            }
        }
        RemapTable {
            width,
            height,
            entries,
        }
    }
}

/// Owns the active compiled mapping.
#[derive(Debug)]
pub struct GeometryEngine {
    current: Arc<CompiledMapping>,
}

impl Default for GeometryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryEngine {
    pub fn new() -> Self {
        Self {
            current: Arc::new(CompiledMapping::identity()),
        }
    }

    pub fn current(&self) -> Arc<CompiledMapping> {
        Arc::clone(&self.current)
    }

    /// Compiles and swaps in `config` (`None` selects identity). An unchanged
    /// config reuses the cached mapping. On error the previous mapping stays
    /// active.
    pub fn stage(&mut self, config: Option<&VideoMappingConfig>) -> Result<Arc<CompiledMapping>> {
        if self.current.config() == config {
            return Ok(self.current());
        }

        let Some(config) = config else {
            return Ok(self.reset());
        };
        let compiled = CompiledMapping::compile(config)?;
        tracing::debug!(
            transform = compiled.transform().kind_name(),
            soft_edge = compiled.soft_edge().is_some(),
            "staged video mapping"
        );
        self.current = Arc::new(compiled);
        Ok(self.current())
    }

    /// Swaps in the identity mapping.
    pub fn reset(&mut self) -> Arc<CompiledMapping> {
        if self.current.config().is_some() {
            self.current = Arc::new(CompiledMapping::identity());
            tracing::debug!("video mapping reset to identity");
        }
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{
        BlendCurve, BlendUnits, EdgeWidths, MeshGridConfig, PerspectivePoints, SoftEdgeConfig,
    };

    fn inset() -> PerspectivePoints {
        PerspectivePoints {
            top_left: Point2::new(0.25, 0.25),
            top_right: Point2::new(0.75, 0.25),
            bottom_left: Point2::new(0.25, 0.75),
            bottom_right: Point2::new(0.75, 0.75),
        }
    }

    #[test]
    fn undeformed_mappings_compile_to_identity() {
        let perspective = CompiledMapping::compile(&VideoMappingConfig::default()).unwrap();
        assert!(perspective.is_identity());

        let mesh =
            CompiledMapping::compile(&VideoMappingConfig::mesh(MeshGridConfig::regular(4, 4)))
                .unwrap();
        assert!(mesh.is_identity());

        let p = Point2::new(0.3, 0.7);
        assert_eq!(
            mesh.sample(p),
            PixelSample::Source { uv: p, alpha: 1.0 }
        );
    }

    #[test]
    fn pixels_outside_the_quad_show_background() {
        let mut config = VideoMappingConfig::perspective(inset());
        config.background_color = Rgba8::parse("#ff0000").unwrap();
        let compiled = CompiledMapping::compile(&config).unwrap();

        assert_eq!(
            compiled.sample(Point2::new(0.1, 0.1)),
            PixelSample::Background(config.background_color)
        );
        match compiled.sample(Point2::new(0.5, 0.5)) {
            PixelSample::Source { uv, alpha } => {
                assert!(uv.distance(Point2::new(0.5, 0.5)) < 1e-9);
                assert_eq!(alpha, 1.0);
            }
            other => panic!("expected source, got {other:?}"),
        }
    }

    #[test]
    fn remap_table_covers_the_quad() {
        let compiled = CompiledMapping::compile(&VideoMappingConfig::perspective(inset())).unwrap();
        let table = compiled.remap_table(Resolution {
            width: 8,
            height: 8,
        });
        assert_eq!(table.entries.len(), 64);
        // Pixel centres 2..=5 on each axis fall inside [0.25, 0.75].
        assert_eq!(table.mapped_pixels(), 16);
        assert!(matches!(table.get(0, 0), Some(PixelSample::Background(_))));
        assert!(matches!(table.get(3, 3), Some(PixelSample::Source { .. })));
        assert!(table.get(8, 0).is_none());
    }

    #[test]
    fn soft_edge_faults_are_kept_with_the_mapping() {
        let mut config = VideoMappingConfig::default();
        config.soft_edge = Some(SoftEdgeConfig {
            enabled: true,
            gamma: 1.0,
            blend_curve: BlendCurve::Linear,
            units: BlendUnits::Normalized,
            individual_blend_widths: EdgeWidths {
                left: 0.9,
                ..EdgeWidths::default()
            },
        });
        let compiled = CompiledMapping::compile(&config).unwrap();
        assert_eq!(compiled.faults().len(), 1);
        match compiled.sample(Point2::new(0.25, 0.5)) {
            PixelSample::Source { alpha, .. } => assert!((alpha - 0.5).abs() < 1e-12),
            other => panic!("expected source, got {other:?}"),
        }
    }

    #[test]
    fn engine_reuses_unchanged_mapping_and_keeps_previous_on_error() {
        let mut engine = GeometryEngine::new();
        let config = VideoMappingConfig::perspective(inset());

        let first = engine.stage(Some(&config)).unwrap();
        let again = engine.stage(Some(&config)).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let broken = VideoMappingConfig::perspective(PerspectivePoints {
            top_left: Point2::new(0.0, 0.0),
            top_right: Point2::new(0.5, 0.5),
            bottom_left: Point2::new(1.0, 1.0),
            bottom_right: Point2::new(0.25, 0.25),
        });
        assert!(engine.stage(Some(&broken)).is_err());
        assert!(Arc::ptr_eq(&engine.current(), &first));

        let identity = engine.stage(None).unwrap();
        assert!(identity.is_identity());
        // A frame holding the old mapping still sees it.
        assert_eq!(first.transform().kind_name(), "perspective");
    }

    #[test]
    fn reset_falls_back_to_identity_without_failing() {
        let mut engine = GeometryEngine::new();
        let untouched = engine.reset();
        assert!(Arc::ptr_eq(&untouched, &engine.current()));

        let staged = engine
            .stage(Some(&VideoMappingConfig::perspective(inset())))
            .unwrap();
        assert!(!staged.is_identity());
        let reset = engine.reset();
        assert!(reset.is_identity());
        assert!(reset.config().is_none());
        assert!(Arc::ptr_eq(&engine.stage(None).unwrap(), &reset));
    }

    #[test]
    fn mesh_mode_without_grid_is_rejected() {
        let mut config = VideoMappingConfig::default();
        config.mode = MappingMode::Mesh;
        let err = CompiledMapping::compile(&config).unwrap_err();
        assert!(matches!(err, ShowSyncError::Configuration(_)));
    }
}
