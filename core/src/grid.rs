use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::game::TAB_MARGIN_DIVISOR;

pub const DIFFICULTY_STEP_MIN: u32 = 3;
pub const DIFFICULTY_STEP_MAX: u32 = 11;

pub const DEFAULT_DIFFICULTY: Difficulty = Difficulty { cols: 3, rows: 5 };

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridParseError {
    #[error("missing grid in difficulty label: {0:?}")]
    MissingGrid(String),
    #[error("invalid grid dimension {0:?}")]
    InvalidDimension(String),
    #[error("label total {label} does not match {cols}x{rows}")]
    TotalMismatch { label: u32, cols: u32, rows: u32 },
    #[error("grid must have at least one row and one column")]
    Empty,
    #[error("{cols}x{rows} grid has too many pieces")]
    TooLarge { cols: u32, rows: u32 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("grid must have at least one row and one column")]
    Empty,
    #[error("{cols}x{rows} grid leaves sub-pixel cells on a {width}x{height} image")]
    CellTooSmall {
        width: u32,
        height: u32,
        cols: u32,
        rows: u32,
    },
}

/// Puzzle size as chosen from the difficulty list: `cols` pieces across, `rows` down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Difficulty {
    pub cols: u32,
    pub rows: u32,
}

impl Difficulty {
    pub fn new(cols: u32, rows: u32) -> Result<Self, GridParseError> {
        if cols == 0 || rows == 0 {
            return Err(GridParseError::Empty);
        }
        if cols.checked_mul(rows).is_none() {
            return Err(GridParseError::TooLarge { cols, rows });
        }
        Ok(Self { cols, rows })
    }

    /// Saturates for hand-built values whose product does not fit.
    pub fn total(&self) -> u32 {
        self.cols.saturating_mul(self.rows)
    }

    /// Leaderboard key, e.g. `"4x6"`.
    pub fn key(&self) -> String {
        format!("{}x{}", self.cols, self.rows)
    }

    /// Selector label, e.g. `"24 (4X6)"`.
    pub fn label(&self) -> String {
        format!("{} ({}X{})", self.total(), self.cols, self.rows)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Difficulty {
    type Err = GridParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (prefix, grid) = match (trimmed.find('('), trimmed.rfind(')')) {
            (Some(open), Some(close)) if open < close => {
                (Some(trimmed[..open].trim()), &trimmed[open + 1..close])
            }
            (None, None) => (None, trimmed),
            _ => return Err(GridParseError::MissingGrid(value.to_string())),
        };
        let mut parts = grid.split(|ch| ch == 'X' || ch == 'x');
        let (Some(cols), Some(rows), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GridParseError::MissingGrid(value.to_string()));
        };
        let cols = parse_dimension(cols)?;
        let rows = parse_dimension(rows)?;
        let difficulty = Difficulty::new(cols, rows)?;
        if let Some(prefix) = prefix.filter(|prefix| !prefix.is_empty()) {
            let label = parse_dimension(prefix)?;
            if label != difficulty.total() {
                return Err(GridParseError::TotalMismatch { label, cols, rows });
            }
        }
        Ok(difficulty)
    }
}

fn parse_dimension(raw: &str) -> Result<u32, GridParseError> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| GridParseError::InvalidDimension(raw.trim().to_string()))
}

/// The standard selector list, `i x (i + 2)` for `i` in 3..=11.
pub fn difficulty_choices() -> Vec<Difficulty> {
    (DIFFICULTY_STEP_MIN..=DIFFICULTY_STEP_MAX)
        .map(|i| Difficulty { cols: i, rows: i + 2 })
        .collect()
}

pub fn difficulty_index(choices: &[Difficulty], difficulty: Difficulty) -> Option<usize> {
    choices.iter().position(|choice| *choice == difficulty)
}

/// Integer pixel layout of one cell: the core region plus the tab margins on its
/// left and top.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRect {
    pub row: u32,
    pub col: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub margin_left: u32,
    pub margin_top: u32,
}

impl CellRect {
    pub fn box_x(&self) -> u32 {
        self.x - self.margin_left
    }

    pub fn box_y(&self) -> u32 {
        self.y - self.margin_top
    }

    pub fn box_width(&self) -> u32 {
        self.width + self.margin_left
    }

    pub fn box_height(&self) -> u32 {
        self.height + self.margin_top
    }
}

/// Grid over an image; the last column and row absorb the division remainder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridLayout {
    pub image_width: u32,
    pub image_height: u32,
    pub cols: u32,
    pub rows: u32,
    pub base_width: u32,
    pub base_height: u32,
}

impl GridLayout {
    pub fn new(image_width: u32, image_height: u32, cols: u32, rows: u32) -> Result<Self, GridError> {
        if cols == 0 || rows == 0 {
            return Err(GridError::Empty);
        }
        let base_width = image_width / cols;
        let base_height = image_height / rows;
        if base_width == 0 || base_height == 0 {
            return Err(GridError::CellTooSmall {
                width: image_width,
                height: image_height,
                cols,
                rows,
            });
        }
        Ok(Self {
            image_width,
            image_height,
            cols,
            rows,
            base_width,
            base_height,
        })
    }

    pub fn margin_x(&self) -> u32 {
        self.base_width / TAB_MARGIN_DIVISOR
    }

    pub fn margin_y(&self) -> u32 {
        self.base_height / TAB_MARGIN_DIVISOR
    }

    pub fn cell_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn cell(&self, row: u32, col: u32) -> CellRect {
        let x = col * self.base_width;
        let y = row * self.base_height;
        let width = if col + 1 == self.cols {
            self.image_width - x
        } else {
            self.base_width
        };
        let height = if row + 1 == self.rows {
            self.image_height - y
        } else {
            self.base_height
        };
        CellRect {
            row,
            col,
            x,
            y,
            width,
            height,
            margin_left: if col > 0 { self.margin_x() } else { 0 },
            margin_top: if row > 0 { self.margin_y() } else { 0 },
        }
    }

    /// Cells in row-major order, matching piece ids.
    pub fn cells(&self) -> impl Iterator<Item = CellRect> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| self.cell(row, col)))
    }
}
