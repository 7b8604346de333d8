use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use image::RgbaImage;
use kirinuki::collaborators::{HighScores, LedgerObserver, HIGH_SCORES_FILE};
use kirinuki::config::{AppConfig, CONFIG_FILE_NAME};
use kirinuki::placement::Board;
use kirinuki::runtime::{CutRequest, PuzzleRuntime};
use kirinuki::session_store::{PuzzleImage, SessionStore};
use kirinuki::stopwatch::format_clock;
use kirinuki::Piece;
use kirinuki_core::action::{PointerEvent, PointerId};
use kirinuki_core::curves::generate_with;
use kirinuki_core::grid::{difficulty_choices, Difficulty};
use kirinuki_image::{cut, encode_png, render_backdrop, CancelToken, ImagePipeline};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;

mod bot;

#[derive(Parser)]
#[command(name = "kirinuki", version, about = "Cut pictures into jigsaw puzzles and play them")]
struct Cli {
    #[arg(long, env = "KIRINUKI_CONFIG", default_value = CONFIG_FILE_NAME)]
    config: PathBuf,
    #[arg(long, env = "KIRINUKI_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Repeat for more log output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PuzzleArgs {
    /// PNG or JPEG to cut.
    image: PathBuf,
    /// Selector label such as "24 (4X6)" or a bare "4x6".
    #[arg(long)]
    difficulty: Option<String>,
    /// Decimal or 0x-prefixed hex.
    #[arg(long)]
    seed: Option<String>,
    /// Board size to fit the picture to, e.g. 1024x768.
    #[arg(long)]
    viewport: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write every piece, the backdrop and the cut lines to a directory.
    Cut {
        #[command(flatten)]
        puzzle: PuzzleArgs,
        #[arg(long, default_value = "pieces")]
        out: PathBuf,
    },
    /// Cut a picture and let the built-in solver play it.
    Play {
        #[command(flatten)]
        puzzle: PuzzleArgs,
        #[command(flatten)]
        solver: bot::SolverArgs,
        /// Suspend and save after this many pieces.
        #[arg(long)]
        suspend_after: Option<usize>,
    },
    /// Continue the saved game with the solver.
    Resume {
        #[command(flatten)]
        solver: bot::SolverArgs,
        #[arg(long)]
        suspend_after: Option<usize>,
    },
    /// Show best times.
    Scores {
        #[arg(long)]
        difficulty: Option<String>,
    },
    /// List the standard puzzle sizes.
    Difficulties,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = AppConfig::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Cut { puzzle, out } => run_cut(&config, puzzle, &out)?,
        Commands::Play {
            puzzle,
            solver,
            suspend_after,
        } => {
            let request = build_request(&config, &puzzle)?;
            let runtime = start_runtime(&config);
            if !runtime.start_cut(request) {
                return Err("another cut or save is running".into());
            }
            if !runtime.board_ready().await? {
                return Err("cutting failed".into());
            }
            play(runtime, &config, solver, suspend_after).await?;
        }
        Commands::Resume {
            solver,
            suspend_after,
        } => {
            let runtime = start_runtime(&config);
            if !runtime.resume_saved().await? {
                println!("no saved game");
                return Ok(());
            }
            play(runtime, &config, solver, suspend_after).await?;
        }
        Commands::Scores { difficulty } => {
            let scores = HighScores::load(&config.data_dir.join(HIGH_SCORES_FILE))?;
            let keys: Vec<String> = match difficulty {
                Some(raw) => vec![raw.parse::<Difficulty>()?.key()],
                None => scores.keys().map(str::to_string).collect(),
            };
            if keys.is_empty() {
                println!("no scores yet");
            }
            for key in keys {
                println!("{key}:");
                for (rank, entry) in scores.entries(&key).iter().enumerate() {
                    println!("  {:>2}. {}", rank + 1, entry.label);
                }
            }
        }
        Commands::Difficulties => {
            for difficulty in difficulty_choices() {
                println!("{}", difficulty.label());
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn start_runtime(config: &AppConfig) -> PuzzleRuntime {
    let store = SessionStore::new(&config.data_dir);
    let ledger = Arc::new(LedgerObserver::new(&config.data_dir));
    PuzzleRuntime::spawn(store, ledger)
}

fn load_picture(config: &AppConfig, puzzle: &PuzzleArgs) -> Result<RgbaImage, Box<dyn std::error::Error>> {
    let mut pipeline = config.pipeline();
    if let Some(raw) = puzzle.viewport.as_deref() {
        pipeline.viewport = Some(parse_size_arg(raw)?);
    }
    Ok(ImagePipeline::new(pipeline).process_file(&puzzle.image)?)
}

fn resolve_puzzle(
    config: &AppConfig,
    puzzle: &PuzzleArgs,
) -> Result<(Difficulty, u32), Box<dyn std::error::Error>> {
    let difficulty = match puzzle.difficulty.as_deref() {
        Some(raw) => raw.parse::<Difficulty>()?,
        None => config.difficulty()?,
    };
    let seed = match puzzle.seed.as_deref() {
        Some(raw) => parse_seed_arg(raw)?,
        None => config.seed.unwrap_or_else(|| rand::rng().random()),
    };
    Ok((difficulty, seed))
}

fn build_request(config: &AppConfig, puzzle: &PuzzleArgs) -> Result<CutRequest, Box<dyn std::error::Error>> {
    let image = Arc::new(load_picture(config, puzzle)?);
    let (difficulty, seed) = resolve_puzzle(config, puzzle)?;
    Ok(CutRequest {
        source: picture_source(&puzzle.image, &config.assets_dir, Arc::clone(&image)),
        image,
        difficulty,
        seed,
        shape: config.shape.clone(),
        cut: config.cut.clone(),
        tray_height: config.tray_height,
    })
}

/// Pictures under the assets directory are referenced by name; anything else
/// is copied into the saved game.
fn picture_source(path: &Path, assets_dir: &Path, image: Arc<RgbaImage>) -> PuzzleImage {
    let bundled = path
        .parent()
        .zip(fs::canonicalize(assets_dir).ok())
        .and_then(|(parent, assets)| fs::canonicalize(parent).ok().map(|parent| parent == assets))
        .unwrap_or(false);
    match path.file_stem().and_then(|stem| stem.to_str()) {
        Some(name) if bundled => PuzzleImage::Asset {
            name: name.to_string(),
        },
        _ => PuzzleImage::Captured { pixels: image },
    }
}

fn run_cut(config: &AppConfig, puzzle: PuzzleArgs, out: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let image = load_picture(config, &puzzle)?;
    let (difficulty, seed) = resolve_puzzle(config, &puzzle)?;
    let (width, height) = image.dimensions();
    let boundary = generate_with(
        width,
        height,
        difficulty.cols,
        difficulty.rows,
        seed,
        &config.shape,
    )?;
    let pieces = cut(
        &image,
        difficulty.rows,
        difficulty.cols,
        &boundary,
        &config.cut,
        &CancelToken::new(),
        |progress| log::debug!("cli: cut {}/{}", progress.done, progress.total),
    )?;

    fs::create_dir_all(out)?;
    for piece in &pieces {
        fs::write(out.join(format!("piece_{}.png", piece.id)), encode_png(&piece.pixels)?)?;
    }
    let backdrop = render_backdrop(&image, &boundary, &config.backdrop)?;
    fs::write(out.join("backdrop.png"), encode_png(&backdrop)?)?;
    fs::write(out.join("boundary.svg"), boundary.to_svg())?;
    println!(
        "cut {} ({}) into {} pieces with seed {:#010x} -> {}",
        puzzle.image.display(),
        difficulty.label(),
        pieces.len(),
        seed,
        out.display()
    );
    Ok(())
}

async fn play(
    runtime: PuzzleRuntime,
    config: &AppConfig,
    solver: bot::SolverArgs,
    suspend_after: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = bot::solve(&runtime, solver, suspend_after).await?;
    let state = runtime.inspect().await?;
    if summary.complete {
        let board = state.board.as_ref();
        println!(
            "solved {} pieces in {} ({} drags, {} missed)",
            board.map_or(0, Board::total),
            format_clock(state.elapsed_seconds),
            summary.drags,
            summary.misses
        );
    } else {
        runtime.suspend()?;
        println!(
            "suspended with {}/{} placed at {}",
            summary.placed,
            state.board.as_ref().map_or(0, Board::total),
            format_clock(state.elapsed_seconds)
        );
    }
    runtime.shutdown().await?;
    if summary.complete {
        let scores = HighScores::load(&config.data_dir.join(HIGH_SCORES_FILE))?;
        if let Some(board) = state.board.as_ref() {
            let key = Difficulty {
                cols: board.cols,
                rows: board.rows,
            }
            .key();
            for entry in scores.entries(&key).iter().take(3) {
                println!("  {}", entry.label);
            }
        }
    }
    Ok(())
}

fn parse_seed_arg(raw: &str) -> Result<u32, Box<dyn std::error::Error>> {
    let trimmed = raw.trim();
    let value = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)?
    } else {
        trimmed.parse::<u32>()?
    };
    Ok(value)
}

fn parse_size_arg(raw: &str) -> Result<(u32, u32), Box<dyn std::error::Error>> {
    let (width, height) = raw
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {raw}"))?;
    let size = (width.trim().parse::<u32>()?, height.trim().parse::<u32>()?);
    if size.0 == 0 || size.1 == 0 {
        return Err(format!("empty viewport {raw}").into());
    }
    Ok(size)
}
