pub const PUZZLE_SEED: u32 = 0x5EED_2520;

pub const ORIENTATION_HORIZONTAL: u32 = 0;
pub const ORIENTATION_VERTICAL: u32 = 1;

pub const DIR_UP: usize = 0;
pub const DIR_RIGHT: usize = 1;
pub const DIR_DOWN: usize = 2;
pub const DIR_LEFT: usize = 3;

/// A drop locks when both axis errors are within `diagonal / SNAP_TOLERANCE_DIVISOR`.
pub const SNAP_TOLERANCE_DIVISOR: f32 = 10.0;

/// Tab margin is `base / TAB_MARGIN_DIVISOR` on sides adjoining an earlier row or column.
pub const TAB_MARGIN_DIVISOR: u32 = 3;

pub fn splitmix32(mut value: u32) -> u32 {
    value = value.wrapping_add(0x9E37_79B9);
    let mut z = value;
    z = (z ^ (z >> 16)).wrapping_mul(0x85EB_CA6B);
    z = (z ^ (z >> 13)).wrapping_mul(0xC2B2_AE35);
    z ^ (z >> 16)
}

pub fn rand_unit(seed: u32, salt: u32) -> f32 {
    let mixed = splitmix32(seed ^ salt);
    let top = mixed >> 8;
    top as f32 / ((1u32 << 24) as f32)
}

pub fn rand_range(seed: u32, salt: u32, min: f32, max: f32) -> f32 {
    min + (max - min) * rand_unit(seed, salt)
}

pub fn jitter_value(
    seed: u32,
    salt: u32,
    base: f32,
    range: f32,
    min: f32,
    max: f32,
    variation: f32,
) -> f32 {
    let jitter = rand_unit(seed, salt) * 2.0 - 1.0;
    let value = base + jitter * range * variation;
    value.clamp(min, max)
}

pub fn edge_seed(base: u32, orientation: u32, row: u32, col: u32) -> u32 {
    base ^ orientation.wrapping_mul(0x9E37_79B9)
        ^ row.wrapping_mul(0x85EB_CA6B)
        ^ col.wrapping_mul(0xC2B2_AE35)
}

pub fn opposite_dir(dir: usize) -> usize {
    (dir + 2) % 4
}

pub fn piece_id(row: u32, col: u32, cols: u32) -> usize {
    row as usize * cols as usize + col as usize
}

/// Returns the neighbouring cell index in direction `dir`, if it is inside the grid.
pub fn neighbor_id(id: usize, cols: u32, rows: u32, dir: usize) -> Option<usize> {
    let cols = cols as usize;
    let rows = rows as usize;
    if cols == 0 || id >= cols * rows {
        return None;
    }
    let row = id / cols;
    let col = id % cols;
    match dir {
        DIR_UP if row > 0 => Some(id - cols),
        DIR_RIGHT if col + 1 < cols => Some(id + 1),
        DIR_DOWN if row + 1 < rows => Some(id + cols),
        DIR_LEFT if col > 0 => Some(id - 1),
        _ => None,
    }
}

pub fn snap_tolerance(width: f32, height: f32) -> f32 {
    (width * width + height * height).sqrt() / SNAP_TOLERANCE_DIVISOR
}
