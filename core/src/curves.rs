use std::fmt::Write;

use rkyv::Archive;
use thiserror::Error;

use crate::game::{
    edge_seed, jitter_value, rand_range, DIR_UP, ORIENTATION_HORIZONTAL, ORIENTATION_VERTICAL,
};
use crate::grid::{CellRect, GridError, GridLayout};

pub const TAB_WIDTH_MIN: f32 = 0.2;
pub const TAB_WIDTH_MAX: f32 = 0.72;
pub const TAB_WIDTH_RANGE: f32 = 0.16;
pub const TAB_DEPTH_MIN: f32 = 0.2;
pub const TAB_DEPTH_MAX: f32 = 1.1;
pub const TAB_DEPTH_RANGE: f32 = 0.35;
pub const TAB_SIZE_SCALE_MIN: f32 = 0.1;
pub const TAB_SIZE_SCALE_MAX: f32 = 0.5;
pub const TAB_SIZE_MIN_LIMIT: f32 = 0.02;
pub const TAB_SIZE_MAX_LIMIT: f32 = 0.2;
pub const JITTER_STRENGTH_MIN: f32 = 0.0;
pub const JITTER_STRENGTH_MAX: f32 = 0.3;
pub const JITTER_LEN_BIAS_MIN: f32 = 0.0;
pub const JITTER_LEN_BIAS_MAX: f32 = 1.0;
pub const TAB_DEPTH_CAP_MIN: f32 = 0.1;
pub const TAB_DEPTH_CAP_MAX: f32 = 0.45;
pub const DEFAULT_TAB_DEPTH_CAP: f32 = 0.30;
pub const SKEW_RANGE_MAX: f32 = 0.2;
pub const VARIATION_MIN: f32 = 0.0;
pub const VARIATION_MAX: f32 = 1.0;
/// Tab control points stay within this fraction of the edge ends.
pub const TAB_SPAN_INSET: f32 = 0.05;
/// Pixels kept free between the deepest tab point and the edge of the margin.
pub const MARGIN_SLACK_PX: f32 = 1.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CurveError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("cell ({row}, {col}) is outside the {rows}x{cols} grid")]
    CellOutOfRange {
        row: u32,
        col: u32,
        rows: u32,
        cols: u32,
    },
    #[error("boundary has {found} {orientation} edges, expected {expected}")]
    EdgeCount {
        orientation: &'static str,
        expected: usize,
        found: usize,
    },
}

#[derive(
    Clone,
    Debug,
    PartialEq,
    serde::Serialize,
    serde::Deserialize,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(default)]
pub struct ShapeSettings {
    pub tab_width: f32,
    pub tab_depth: f32,
    pub tab_size_scale: f32,
    pub tab_size_min: f32,
    pub tab_size_max: f32,
    pub jitter_strength: f32,
    pub jitter_len_bias: f32,
    pub tab_depth_cap: f32,
    pub skew_range: f32,
    pub variation: f32,
}

impl Default for ShapeSettings {
    fn default() -> Self {
        Self {
            tab_width: 0.43,
            tab_depth: 0.98,
            tab_size_scale: 0.25,
            tab_size_min: 0.04,
            tab_size_max: 0.16,
            jitter_strength: 0.13,
            jitter_len_bias: 0.4,
            tab_depth_cap: DEFAULT_TAB_DEPTH_CAP,
            skew_range: 0.18,
            variation: 0.16,
        }
    }
}

/// Randomized shape of one edge. Lengths are fractions of the edge length, depths
/// fractions of the shorter adjacent cell dimension.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeParams {
    pub tab_size: f32,
    pub tab_depth: f32,
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
}

pub fn edge_params(seed: u32, settings: &ShapeSettings) -> EdgeParams {
    let variation = settings.variation.clamp(VARIATION_MIN, VARIATION_MAX);
    let tab_size_raw = jitter_value(
        seed,
        0,
        settings.tab_width,
        TAB_WIDTH_RANGE,
        TAB_WIDTH_MIN,
        TAB_WIDTH_MAX,
        variation,
    );
    let tab_depth_raw = jitter_value(
        seed,
        2,
        settings.tab_depth,
        TAB_DEPTH_RANGE,
        TAB_DEPTH_MIN,
        TAB_DEPTH_MAX,
        variation,
    );
    let tab_size_scale = settings
        .tab_size_scale
        .clamp(TAB_SIZE_SCALE_MIN, TAB_SIZE_SCALE_MAX);
    let tab_size_min = settings
        .tab_size_min
        .clamp(TAB_SIZE_MIN_LIMIT, TAB_SIZE_MAX_LIMIT);
    let tab_size_max = settings
        .tab_size_max
        .clamp(tab_size_min, TAB_SIZE_MAX_LIMIT);
    let tab_size = (tab_size_raw * tab_size_scale).clamp(tab_size_min, tab_size_max);
    let tab_depth = tab_depth_raw.clamp(TAB_DEPTH_MIN, TAB_DEPTH_MAX);
    let jitter_strength = settings
        .jitter_strength
        .clamp(JITTER_STRENGTH_MIN, JITTER_STRENGTH_MAX);
    let jitter_base = (variation * jitter_strength).clamp(0.0, jitter_strength);
    let skew_ratio = (settings.skew_range / SKEW_RANGE_MAX).clamp(0.0, 1.0);
    let jitter_len_bias = settings
        .jitter_len_bias
        .clamp(JITTER_LEN_BIAS_MIN, JITTER_LEN_BIAS_MAX);
    let jitter_len = jitter_base * (jitter_len_bias + (1.0 - jitter_len_bias) * skew_ratio);
    let jitter_depth = jitter_base * tab_depth;
    // Shoulder and head offsets only ever push toward the tab side.
    EdgeParams {
        tab_size,
        tab_depth,
        a: rand_range(seed, 3, 0.0, jitter_depth),
        b: rand_range(seed, 4, -jitter_len, jitter_len),
        c: rand_range(seed, 5, 0.0, jitter_depth),
        d: rand_range(seed, 6, -jitter_len, jitter_len),
        e: rand_range(seed, 7, 0.0, jitter_depth),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum Segment {
    Line { to: Point },
    Cubic { ctrl1: Point, ctrl2: Point, to: Point },
}

impl Segment {
    pub fn end(&self) -> Point {
        match *self {
            Segment::Line { to } | Segment::Cubic { to, .. } => to,
        }
    }
}

/// One side of a cell: an absolute start point followed by segments in image
/// pixel space.
#[derive(Clone, Debug, PartialEq, Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct EdgeTrace {
    pub start: Point,
    pub segments: Vec<Segment>,
}

impl EdgeTrace {
    pub fn line(from: Point, to: Point) -> Self {
        Self {
            start: from,
            segments: vec![Segment::Line { to }],
        }
    }

    pub fn end(&self) -> Point {
        self.segments
            .last()
            .map(Segment::end)
            .unwrap_or(self.start)
    }

    pub fn is_straight(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Line { .. }))
    }

    /// The same curve traversed from the other end.
    pub fn reversed(&self) -> Self {
        let mut starts = Vec::with_capacity(self.segments.len());
        let mut current = self.start;
        for segment in &self.segments {
            starts.push(current);
            current = segment.end();
        }
        let segments = self
            .segments
            .iter()
            .zip(starts)
            .rev()
            .map(|(segment, start)| match *segment {
                Segment::Line { .. } => Segment::Line { to: start },
                Segment::Cubic { ctrl1, ctrl2, .. } => Segment::Cubic {
                    ctrl1: ctrl2,
                    ctrl2: ctrl1,
                    to: start,
                },
            })
            .collect();
        Self {
            start: current,
            segments,
        }
    }

    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        std::iter::once(self.start).chain(self.segments.iter().flat_map(|segment| {
            let points: Vec<Point> = match *segment {
                Segment::Line { to } => vec![to],
                Segment::Cubic { ctrl1, ctrl2, to } => vec![ctrl1, ctrl2, to],
            };
            points
        }))
    }

    pub fn to_path_commands(&self) -> Vec<PathCommand> {
        let mut commands = Vec::with_capacity(self.segments.len() + 1);
        commands.push(PathCommand::MoveTo {
            x: self.start.x,
            y: self.start.y,
        });
        self.append_segments(&mut commands);
        commands
    }

    fn append_segments(&self, commands: &mut Vec<PathCommand>) {
        for segment in &self.segments {
            commands.push(match *segment {
                Segment::Line { to } => PathCommand::LineTo { x: to.x, y: to.y },
                Segment::Cubic { ctrl1, ctrl2, to } => PathCommand::CurveTo {
                    x1: ctrl1.x,
                    y1: ctrl1.y,
                    x2: ctrl2.x,
                    y2: ctrl2.y,
                    x: to.x,
                    y: to.y,
                },
            });
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathCommand {
    MoveTo {
        x: f32,
        y: f32,
    },
    LineTo {
        x: f32,
        y: f32,
    },
    CurveTo {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        x: f32,
        y: f32,
    },
    Close,
}

impl PathCommand {
    pub fn to_svg_path(commands: &[PathCommand]) -> String {
        let mut out = String::new();
        for command in commands {
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = match *command {
                PathCommand::MoveTo { x, y } => write!(out, "M {} {}", fmt_f32(x), fmt_f32(y)),
                PathCommand::LineTo { x, y } => write!(out, "L {} {}", fmt_f32(x), fmt_f32(y)),
                PathCommand::CurveTo {
                    x1,
                    y1,
                    x2,
                    y2,
                    x,
                    y,
                } => write!(
                    out,
                    "C {} {} {} {} {} {}",
                    fmt_f32(x1),
                    fmt_f32(y1),
                    fmt_f32(x2),
                    fmt_f32(y2),
                    fmt_f32(x),
                    fmt_f32(y)
                ),
                PathCommand::Close => write!(out, "Z"),
            };
        }
        out
    }
}

pub fn fmt_f32(value: f32) -> String {
    format!("{:.3}", value)
}

/// Vector boundary of every cell of a grid. Each internal edge is stored once;
/// the cell below (or to the right) owns its tab.
#[derive(Clone, Debug, PartialEq, Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct BoundaryDescriptor {
    pub width: u32,
    pub height: u32,
    pub cols: u32,
    pub rows: u32,
    pub seed: u32,
    pub settings: ShapeSettings,
    /// Edge between row `r - 1` and `r` at column `c`, stored at `(r - 1) * cols + c`.
    pub horizontal: Vec<EdgeTrace>,
    /// Edge between column `c - 1` and `c` at row `r`, stored at `r * (cols - 1) + c - 1`.
    pub vertical: Vec<EdgeTrace>,
}

pub fn generate(
    width: u32,
    height: u32,
    cols: u32,
    rows: u32,
    seed: u32,
) -> Result<BoundaryDescriptor, CurveError> {
    generate_with(width, height, cols, rows, seed, &ShapeSettings::default())
}

pub fn generate_with(
    width: u32,
    height: u32,
    cols: u32,
    rows: u32,
    seed: u32,
    settings: &ShapeSettings,
) -> Result<BoundaryDescriptor, CurveError> {
    let layout = GridLayout::new(width, height, cols, rows)?;
    let cap = settings
        .tab_depth_cap
        .clamp(TAB_DEPTH_CAP_MIN, TAB_DEPTH_CAP_MAX);

    let mut horizontal = Vec::with_capacity(((rows - 1) * cols) as usize);
    for row in 1..rows {
        for col in 0..cols {
            let cell = layout.cell(row, col);
            let above = layout.cell(row - 1, col);
            let short = cell.width.min(cell.height).min(above.height) as f32;
            let limit = depth_limit(cap, short, layout.margin_y());
            let params = edge_params(edge_seed(seed, ORIENTATION_HORIZONTAL, row, col), settings);
            let (x0, y0) = (cell.x as f32, cell.y as f32);
            horizontal.push(build_edge(&params, cell.width as f32, short, limit, |u, v| {
                Point::new(x0 + u, y0 - v)
            }));
        }
    }

    let mut vertical = Vec::with_capacity((rows * (cols - 1)) as usize);
    for row in 0..rows {
        for col in 1..cols {
            let cell = layout.cell(row, col);
            let left = layout.cell(row, col - 1);
            let short = cell.height.min(cell.width).min(left.width) as f32;
            let limit = depth_limit(cap, short, layout.margin_x());
            let params = edge_params(edge_seed(seed, ORIENTATION_VERTICAL, row, col), settings);
            let (x0, y0) = (cell.x as f32, cell.y as f32);
            vertical.push(build_edge(&params, cell.height as f32, short, limit, |u, v| {
                Point::new(x0 - v, y0 + u)
            }));
        }
    }

    log::debug!(
        "curves: generated {}x{} boundary over {}x{} (seed {:#010x})",
        cols,
        rows,
        width,
        height,
        seed
    );
    Ok(BoundaryDescriptor {
        width,
        height,
        cols,
        rows,
        seed,
        settings: settings.clone(),
        horizontal,
        vertical,
    })
}

fn depth_limit(cap: f32, short: f32, margin: u32) -> f32 {
    (cap * short).min(margin as f32 - MARGIN_SLACK_PX).max(0.0)
}

/// Three cubics approximating a round tab with a pinched neck. `map(u, v)` takes
/// a distance along the edge and a depth toward the tab side, both in pixels.
fn build_edge<F>(params: &EdgeParams, len: f32, short: f32, limit: f32, map: F) -> EdgeTrace
where
    F: Fn(f32, f32) -> Point,
{
    let t_len = params.tab_size;
    let t_depth = (t_len * params.tab_depth * short).min(limit / 3.0);
    let spare = (limit - 3.0 * t_depth).max(0.0);
    let a = (params.a * short).min(spare);
    let c = (params.c * short).min(spare);
    let e = (params.e * short).min(spare);
    let b = params.b;
    let d = params.d;

    let u_min = len * TAB_SPAN_INSET;
    let u_max = len * (1.0 - TAB_SPAN_INSET);
    let l = |v: f32| (len * v).clamp(u_min, u_max);
    let w = |v: f32| v.clamp(0.0, limit);

    let p0 = map(0.0, 0.0);
    let p1 = map(l(0.2), w(a));
    let p2 = map(l(0.5 + b + d), w(c - t_depth));
    let p3 = map(l(0.5 - t_len + b), w(t_depth + c));
    let p4 = map(l(0.5 - 2.0 * t_len + b - d), w(3.0 * t_depth + c));
    let p5 = map(l(0.5 + 2.0 * t_len + b - d), w(3.0 * t_depth + c));
    let p6 = map(l(0.5 + t_len + b), w(t_depth + c));
    let p7 = map(l(0.5 + b + d), w(c - t_depth));
    let p8 = map(l(0.8), w(e));
    let p9 = map(len, 0.0);

    EdgeTrace {
        start: p0,
        segments: vec![
            Segment::Cubic {
                ctrl1: p1,
                ctrl2: p2,
                to: p3,
            },
            Segment::Cubic {
                ctrl1: p4,
                ctrl2: p5,
                to: p6,
            },
            Segment::Cubic {
                ctrl1: p7,
                ctrl2: p8,
                to: p9,
            },
        ],
    }
}

impl BoundaryDescriptor {
    pub fn layout(&self) -> Result<GridLayout, CurveError> {
        Ok(GridLayout::new(self.width, self.height, self.cols, self.rows)?)
    }

    /// Checks that a descriptor read back from storage matches its own grid.
    pub fn validate(&self) -> Result<(), CurveError> {
        self.layout()?;
        let expected_h = ((self.rows - 1) * self.cols) as usize;
        if self.horizontal.len() != expected_h {
            return Err(CurveError::EdgeCount {
                orientation: "horizontal",
                expected: expected_h,
                found: self.horizontal.len(),
            });
        }
        let expected_v = (self.rows * (self.cols - 1)) as usize;
        if self.vertical.len() != expected_v {
            return Err(CurveError::EdgeCount {
                orientation: "vertical",
                expected: expected_v,
                found: self.vertical.len(),
            });
        }
        Ok(())
    }

    fn cell(&self, row: u32, col: u32) -> Result<CellRect, CurveError> {
        if row >= self.rows || col >= self.cols {
            return Err(CurveError::CellOutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(self.layout()?.cell(row, col))
    }

    fn horizontal_edge(&self, row: u32, col: u32) -> Option<&EdgeTrace> {
        if row == 0 || row >= self.rows || col >= self.cols {
            return None;
        }
        self.horizontal.get(((row - 1) * self.cols + col) as usize)
    }

    fn vertical_edge(&self, row: u32, col: u32) -> Option<&EdgeTrace> {
        if col == 0 || col >= self.cols || row >= self.rows {
            return None;
        }
        self.vertical.get((row * (self.cols - 1) + col - 1) as usize)
    }

    /// Per-side traces of a cell, indexed by `DIR_UP`, `DIR_RIGHT`, `DIR_DOWN`,
    /// `DIR_LEFT`, chained clockwise from the top-left corner.
    pub fn cell_edges(&self, row: u32, col: u32) -> Result<[EdgeTrace; 4], CurveError> {
        let cell = self.cell(row, col)?;
        let x0 = cell.x as f32;
        let y0 = cell.y as f32;
        let x1 = (cell.x + cell.width) as f32;
        let y1 = (cell.y + cell.height) as f32;
        let top_left = Point::new(x0, y0);
        let top_right = Point::new(x1, y0);
        let bottom_right = Point::new(x1, y1);
        let bottom_left = Point::new(x0, y1);

        let top = self
            .horizontal_edge(row, col)
            .cloned()
            .unwrap_or_else(|| EdgeTrace::line(top_left, top_right));
        let right = self
            .vertical_edge(row, col + 1)
            .cloned()
            .unwrap_or_else(|| EdgeTrace::line(top_right, bottom_right));
        let bottom = self
            .horizontal_edge(row + 1, col)
            .map(EdgeTrace::reversed)
            .unwrap_or_else(|| EdgeTrace::line(bottom_right, bottom_left));
        let left = self
            .vertical_edge(row, col)
            .map(EdgeTrace::reversed)
            .unwrap_or_else(|| EdgeTrace::line(bottom_left, top_left));

        Ok([top, right, bottom, left])
    }

    /// Closed outline of a cell in image pixel space.
    pub fn cell_path(&self, row: u32, col: u32) -> Result<Vec<PathCommand>, CurveError> {
        let edges = self.cell_edges(row, col)?;
        let mut commands = Vec::new();
        commands.push(PathCommand::MoveTo {
            x: edges[DIR_UP].start.x,
            y: edges[DIR_UP].start.y,
        });
        for edge in &edges {
            edge.append_segments(&mut commands);
        }
        commands.push(PathCommand::Close);
        Ok(commands)
    }

    pub fn internal_edges(&self) -> impl Iterator<Item = &EdgeTrace> {
        self.horizontal.iter().chain(self.vertical.iter())
    }

    /// Whole grid as a standalone SVG document: the outer frame plus one path per
    /// internal edge.
    pub fn to_svg(&self) -> String {
        let w = self.width as f32;
        let h = self.height as f32;
        let frame = [
            PathCommand::MoveTo { x: 0.0, y: 0.0 },
            PathCommand::LineTo { x: w, y: 0.0 },
            PathCommand::LineTo { x: w, y: h },
            PathCommand::LineTo { x: 0.0, y: h },
            PathCommand::Close,
        ];
        let mut out = String::new();
        let _ = writeln!(
            out,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\" viewBox=\"0 0 {} {}\">",
            self.width, self.height, self.width, self.height
        );
        let _ = writeln!(
            out,
            "<g fill=\"none\" stroke=\"black\" stroke-width=\"1\">"
        );
        let _ = writeln!(out, "<path d=\"{}\"/>", PathCommand::to_svg_path(&frame));
        for edge in self.internal_edges() {
            let _ = writeln!(
                out,
                "<path d=\"{}\"/>",
                PathCommand::to_svg_path(&edge.to_path_commands())
            );
        }
        out.push_str("</g>\n</svg>\n");
        out
    }
}
