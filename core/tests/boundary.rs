use kirinuki_core::curves::{generate, BoundaryDescriptor, PathCommand};
use kirinuki_core::game::{DIR_DOWN, DIR_LEFT, DIR_RIGHT, DIR_UP, PUZZLE_SEED};
use kirinuki_core::grid::{Difficulty, GridLayout, GridParseError};
use kirinuki_core::snapshot::{ImageRef, PieceRecord, SessionManifest, SESSION_SNAPSHOT_VERSION};
use kirinuki_core::{decode, encode, ShapeSettings};

fn path_bounds(commands: &[PathCommand]) -> (f32, f32, f32, f32) {
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    let mut visit = |x: f32, y: f32| {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    };
    for command in commands {
        match *command {
            PathCommand::MoveTo { x, y } | PathCommand::LineTo { x, y } => visit(x, y),
            PathCommand::CurveTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => {
                visit(x1, y1);
                visit(x2, y2);
                visit(x, y);
            }
            PathCommand::Close => {}
        }
    }
    (min_x, min_y, max_x, max_y)
}

#[test]
fn shared_edges_mirror_each_other() {
    let boundary = generate(640, 480, 5, 4, PUZZLE_SEED).expect("generate");
    for row in 0..4 {
        for col in 0..5 {
            let edges = boundary.cell_edges(row, col).expect("edges");
            if row + 1 < 4 {
                let below = boundary.cell_edges(row + 1, col).expect("below");
                assert_eq!(edges[DIR_DOWN], below[DIR_UP].reversed());
            }
            if col + 1 < 5 {
                let right = boundary.cell_edges(row, col + 1).expect("right");
                assert_eq!(edges[DIR_RIGHT], right[DIR_LEFT].reversed());
            }
        }
    }
}

#[test]
fn three_by_three_paths_stay_inside_their_boxes() {
    let boundary = generate(300, 300, 3, 3, PUZZLE_SEED).expect("generate");
    let layout = GridLayout::new(300, 300, 3, 3).expect("layout");
    assert_eq!(layout.margin_x(), 33);
    let center = layout.cell(1, 1);
    assert_eq!(
        (center.box_x(), center.box_y(), center.box_width(), center.box_height()),
        (67, 67, 133, 133)
    );
    let corner = layout.cell(0, 0);
    assert_eq!(
        (corner.box_x(), corner.box_y(), corner.box_width(), corner.box_height()),
        (0, 0, 100, 100)
    );
    for cell in layout.cells() {
        let path = boundary.cell_path(cell.row, cell.col).expect("path");
        let (min_x, min_y, max_x, max_y) = path_bounds(&path);
        assert!(min_x >= cell.box_x() as f32, "cell {:?}", cell);
        assert!(min_y >= cell.box_y() as f32, "cell {:?}", cell);
        assert!(max_x <= (cell.box_x() + cell.box_width()) as f32, "cell {:?}", cell);
        assert!(max_y <= (cell.box_y() + cell.box_height()) as f32, "cell {:?}", cell);
    }
}

#[test]
fn manifest_survives_the_codec_with_its_boundary() {
    let boundary = generate(200, 100, 2, 1, 77).expect("generate");
    let manifest = SessionManifest {
        version: SESSION_SNAPSHOT_VERSION,
        image_ref: ImageRef::Asset {
            name: "lighthouse".to_string(),
        },
        source_digest: None,
        image_width: 200,
        image_height: 100,
        rows: 1,
        cols: 2,
        seed: 77,
        shape: ShapeSettings::default(),
        boundary: Some(boundary.clone()),
        elapsed_seconds: 93,
        pieces: vec![PieceRecord {
            id: 1,
            row: 0,
            col: 1,
            target: (67.0, 0.0),
            current: (12.5, 340.25),
            width: 133,
            height: 100,
            locked: false,
            raster: "piece_1.png".to_string(),
            digest: [7; 32],
        }],
    };
    let bytes = encode(&manifest).expect("encode");
    let decoded: SessionManifest = decode(&bytes).expect("decode");
    assert_eq!(decoded, manifest);
    let restored: BoundaryDescriptor = decoded.boundary.expect("boundary");
    assert_eq!(restored, boundary);

    let truncated = &bytes[..bytes.len() / 2];
    assert!(decode::<SessionManifest>(truncated).is_none());
}

#[test]
fn oversized_difficulty_labels_are_rejected() {
    assert_eq!(
        "1 (65536X65536)".parse::<Difficulty>(),
        Err(GridParseError::TooLarge {
            cols: 65536,
            rows: 65536
        })
    );
    assert!(matches!(
        "65536x65536".parse::<Difficulty>(),
        Err(GridParseError::TooLarge { .. })
    ));
    let widest = "65535x65537".parse::<Difficulty>().expect("fits in u32");
    assert_eq!(widest.total(), 65535 * 65537);
}
