use super::*;

#[derive(clap::Args, Clone, Copy, Debug)]
pub(super) struct SolverArgs {
    /// Seed for the solver's own choices.
    #[arg(long)]
    pub solver_seed: Option<u64>,
    #[arg(long, default_value_t = 0)]
    pub think_min_ms: u64,
    #[arg(long, default_value_t = 40)]
    pub think_max_ms: u64,
    #[arg(long, default_value_t = 12)]
    pub drag_steps: u32,
    #[arg(long, default_value_t = 0)]
    pub tick_ms: u64,
    #[arg(long, default_value_t = 1.0)]
    pub jitter_px: f32,
    /// Share of drops that land outside the snap tolerance.
    #[arg(long, default_value_t = 0.1)]
    pub miss_rate: f32,
}

#[derive(Debug, Default)]
pub(super) struct SolveSummary {
    pub drags: usize,
    pub misses: usize,
    pub placed: usize,
    pub complete: bool,
}

struct DragPlan {
    piece_id: usize,
    grab: (f32, f32),
    start: (f32, f32),
    target: (f32, f32),
    miss: bool,
}

const SOLVER_POINTER: PointerId = 1;

/// Drags pieces home through the runtime's pointer queue until the board is
/// complete or `stop_after` pieces have been placed.
pub(super) async fn solve(
    runtime: &PuzzleRuntime,
    args: SolverArgs,
    stop_after: Option<usize>,
) -> Result<SolveSummary, Box<dyn std::error::Error>> {
    validate_solver_args(args)?;
    let mut rng = match args.solver_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut summary = SolveSummary::default();
    let mut placed_here = 0usize;

    loop {
        let state = runtime.inspect().await?;
        let Some(board) = state.board.as_ref() else {
            return Err(err_msg("no board to solve"));
        };
        summary.placed = board.placed_count();
        if board.is_complete() {
            summary.complete = true;
            break;
        }
        if stop_after.is_some_and(|limit| placed_here >= limit) {
            break;
        }
        let Some(plan) = choose_drag(board, args, &mut rng) else {
            return Err(err_msg("no movable piece left on an unfinished board"));
        };

        let think_ms = sample_low_biased_u64(&mut rng, args.think_min_ms, args.think_max_ms);
        if think_ms > 0 {
            sleep(Duration::from_millis(think_ms)).await;
        }
        run_drag(runtime, &plan, args, &mut rng).await?;
        summary.drags += 1;

        let after = runtime.inspect().await?;
        let locked = after
            .board
            .as_ref()
            .and_then(|board| board.piece(plan.piece_id))
            .is_some_and(|piece| piece.locked);
        if locked {
            placed_here += 1;
        } else {
            summary.misses += 1;
            log::debug!(
                "solver: piece {} dropped short{}",
                plan.piece_id,
                if plan.miss { " on purpose" } else { "" }
            );
        }
    }
    Ok(summary)
}

fn validate_solver_args(args: SolverArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.think_max_ms < args.think_min_ms {
        return Err(err_msg("invalid think-time range"));
    }
    if args.drag_steps == 0 {
        return Err(err_msg("drag needs at least one step"));
    }
    if !(0.0..1.0).contains(&args.miss_rate) {
        return Err(err_msg("miss rate must be in [0, 1)"));
    }
    if !args.jitter_px.is_finite() || args.jitter_px < 0.0 {
        return Err(err_msg("invalid jitter"));
    }
    Ok(())
}

/// Border pieces are favoured while the board is mostly empty.
fn choose_drag(board: &Board, args: SolverArgs, rng: &mut StdRng) -> Option<DragPlan> {
    let movable: Vec<&Piece> = board.pieces().iter().filter(|piece| !piece.locked).collect();
    if movable.is_empty() {
        return None;
    }
    let border: Vec<&Piece> = movable
        .iter()
        .copied()
        .filter(|piece| is_border_piece(piece, board.cols, board.rows))
        .collect();
    let completion = board.placed_count() as f32 / board.total().max(1) as f32;
    let border_bias = lerp_f32(0.9, 0.2, completion);
    let pool = if !border.is_empty() && rng.random::<f32>() < border_bias {
        &border
    } else {
        &movable
    };
    let piece = pool[rng.random_range(0..pool.len())];

    let grab = (
        rng.random_range(0.3..=0.7) * piece.width as f32,
        rng.random_range(0.3..=0.7) * piece.height as f32,
    );
    let tolerance = piece.snap_tolerance();
    let miss = rng.random::<f32>() < args.miss_rate;
    let mut target = piece.target;
    let radius = if miss {
        tolerance * rng.random_range(1.5..=2.5)
    } else {
        tolerance * rng.random_range(0.0..=0.5)
    };
    let theta = rng.random_range(0.0f32..std::f32::consts::TAU);
    // A hit stays within half the tolerance on each axis.
    target.0 += radius * theta.cos();
    target.1 += radius * theta.sin();
    if miss {
        target.0 = piece.target.0 + radius;
    }
    Some(DragPlan {
        piece_id: piece.id,
        grab,
        start: piece.current,
        target,
        miss,
    })
}

async fn run_drag(
    runtime: &PuzzleRuntime,
    plan: &DragPlan,
    args: SolverArgs,
    rng: &mut StdRng,
) -> Result<(), Box<dyn std::error::Error>> {
    let pointer = |pos: (f32, f32)| (pos.0 + plan.grab.0, pos.1 + plan.grab.1);
    let (down_x, down_y) = pointer(plan.start);
    runtime.pointer(PointerEvent::down(SOLVER_POINTER, down_x, down_y).on_piece(plan.piece_id))?;

    for step in 1..args.drag_steps {
        let t = step as f32 / args.drag_steps as f32;
        let eased = t * t * (3.0 - 2.0 * t);
        let jitter_scale = (1.0 - t) * args.jitter_px;
        let (jitter_x, jitter_y) = if jitter_scale > 0.0 {
            (
                rng.random_range(-jitter_scale..=jitter_scale),
                rng.random_range(-jitter_scale..=jitter_scale),
            )
        } else {
            (0.0, 0.0)
        };
        let (x, y) = pointer((
            plan.start.0 + (plan.target.0 - plan.start.0) * eased + jitter_x,
            plan.start.1 + (plan.target.1 - plan.start.1) * eased + jitter_y,
        ));
        runtime.pointer(PointerEvent::moved(SOLVER_POINTER, x, y))?;
        if args.tick_ms > 0 {
            sleep(Duration::from_millis(args.tick_ms)).await;
        }
    }

    let (up_x, up_y) = pointer(plan.target);
    runtime.pointer(PointerEvent::up(SOLVER_POINTER, up_x, up_y))?;
    Ok(())
}

fn is_border_piece(piece: &Piece, cols: u32, rows: u32) -> bool {
    piece.row == 0 || piece.col == 0 || piece.row + 1 == rows || piece.col + 1 == cols
}

fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

fn sample_low_biased_u64(rng: &mut StdRng, min: u64, max: u64) -> u64 {
    if max <= min {
        return min;
    }
    let span = (max - min) as f32;
    let u = rng.random::<f32>();
    let shaped = u.powf(1.9);
    min.saturating_add((span * shaped).round() as u64)
}

fn err_msg(message: &str) -> Box<dyn std::error::Error> {
    Box::from(message)
}
