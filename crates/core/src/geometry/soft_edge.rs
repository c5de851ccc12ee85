use crate::mapping::{BlendCurve, BlendUnits, EdgeWidths, Point2, Resolution, SoftEdgeConfig};
use crate::ShowSyncError;

/// Largest blend width, as a fraction of the mapped span.
pub const MAX_EDGE_FRACTION: f64 = 0.5;

/// Edge-blend alpha evaluated over source UV. Widths are stored normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftEdge {
    curve: BlendCurve,
    gamma: f64,
    widths: EdgeWidths,
}

impl SoftEdge {
    /// Normalizes the widths against `resolution` and clamps out-of-range
    /// values. Every correction is returned as a configuration fault next to
    /// the usable blend.
    pub fn compile(config: &SoftEdgeConfig, resolution: Resolution) -> (Self, Vec<ShowSyncError>) {
        let mut faults = Vec::new();

        let gamma = if config.gamma.is_finite() && config.gamma > 0.0 {
            config.gamma
        } else {
            faults.push(ShowSyncError::config(format!(
                "soft edge gamma {} must be positive, using 1.0",
                config.gamma
            )));
            1.0
        };

        let (span_x, span_y) = match config.units {
            BlendUnits::Pixels => (
                f64::from(resolution.width.max(1)),
                f64::from(resolution.height.max(1)),
            ),
            BlendUnits::Normalized => (1.0, 1.0),
        };

        let raw = config.individual_blend_widths;
        let mut normalize = |edge: &str, width: f64, span: f64| {
            let value = width / span;
            if !value.is_finite() || value < 0.0 {
                faults.push(ShowSyncError::config(format!(
                    "soft edge {edge} width {width} is negative, ignoring it"
                )));
                0.0
            } else if value > MAX_EDGE_FRACTION {
                faults.push(ShowSyncError::config(format!(
                    "soft edge {edge} width {width} exceeds half the mapped span, clamping"
                )));
                MAX_EDGE_FRACTION
            } else {
                value
            }
        };
        let widths = EdgeWidths {
            left: normalize("left", raw.left, span_x),
            right: normalize("right", raw.right, span_x),
            top: normalize("top", raw.top, span_y),
            bottom: normalize("bottom", raw.bottom, span_y),
        };

        (
            Self {
                curve: config.blend_curve,
                gamma,
                widths,
            },
            faults,
        )
    }

    pub fn widths(&self) -> EdgeWidths {
        self.widths
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn is_noop(&self) -> bool {
        let w = self.widths;
        w.left <= 0.0 && w.right <= 0.0 && w.top <= 0.0 && w.bottom <= 0.0
    }

    fn edge_factor(&self, distance: f64, width: f64) -> f64 {
        if width <= 0.0 || distance >= width {
            return 1.0;
        }
        let t = (distance / width).clamp(0.0, 1.0);
        self.curve.apply(t).powf(self.gamma)
    }

    /// Product of the four edge factors at `uv`.
    pub fn alpha(&self, uv: Point2) -> f64 {
        let w = self.widths;
        self.edge_factor(uv.x, w.left)
            * self.edge_factor(1.0 - uv.x, w.right)
            * self.edge_factor(uv.y, w.top)
            * self.edge_factor(1.0 - uv.y, w.bottom)
    }
}
