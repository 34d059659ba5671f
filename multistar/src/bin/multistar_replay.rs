use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use multistar::{
    synthetic::{render_star_field, SyntheticStar},
    CentroidFinder, FrameOutcome, GuideEvent, GuidingSession, MultiStarConfig, PixelPoint,
    SimpleFrameController, StrategyKind,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use shared_wasm::Timestamp;

/// Star `index` is hidden for frames `start..=end`.
#[derive(Debug, Clone, Copy)]
struct Occlusion {
    index: usize,
    start: u64,
    end: u64,
}

fn parse_occlusion(s: &str) -> Result<Occlusion, String> {
    let (index, range) = s
        .split_once(':')
        .ok_or_else(|| format!("expected INDEX:START-END, got '{s}'"))?;
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| format!("expected START-END, got '{range}'"))?;
    let occlusion = Occlusion {
        index: index.parse().map_err(|e| format!("bad star index: {e}"))?,
        start: start.parse().map_err(|e| format!("bad start frame: {e}"))?,
        end: end.parse().map_err(|e| format!("bad end frame: {e}"))?,
    };
    if occlusion.end < occlusion.start {
        return Err(format!("occlusion ends before it starts: '{s}'"));
    }
    Ok(occlusion)
}

/// Command line arguments for the guiding replay
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Replay a synthetic multi-star guiding run",
    long_about = "Renders a synthetic star field frame by frame and runs it through a \
        guiding session with a simulated mount closing the loop.\n\n\
        Stars can be hidden for frame ranges and the whole field can be shifted at \
        a given frame to exercise reacquisition and jump admission. Prints the \
        outcome of every frame followed by summary statistics."
)]
struct Args {
    #[arg(short = 'n', long, default_value_t = 120, help = "Number of frames to process")]
    frames: u64,

    #[arg(
        short,
        long,
        default_value_t = 5,
        help = "Number of guide stars (primary included)"
    )]
    stars: usize,

    #[arg(long, default_value_t = 1000, help = "Frame interval in milliseconds")]
    interval_ms: u64,

    #[arg(
        long,
        default_value_t = 0.05,
        help = "Uncorrected drift in X (pixels per frame)"
    )]
    drift_x: f64,

    #[arg(
        long,
        default_value_t = 0.02,
        help = "Uncorrected drift in Y (pixels per frame)"
    )]
    drift_y: f64,

    #[arg(
        long,
        default_value_t = 0.15,
        help = "Seeing jitter sigma (pixels)"
    )]
    jitter: f64,

    #[arg(
        long,
        default_value_t = 0.7,
        help = "Fraction of each accepted offset the simulated mount corrects"
    )]
    aggressiveness: f64,

    #[arg(
        long = "occlude",
        value_parser = parse_occlusion,
        help = "Hide a star for a frame range, as INDEX:START-END (repeatable)",
        long_help = "Hide star INDEX (0 is the primary) for frames START through END \
            inclusive. May be given multiple times, e.g. --occlude 1:20-30 --occlude 0:40-45."
    )]
    occlusions: Vec<Occlusion>,

    #[arg(long, help = "Frame at which the whole field jumps")]
    jump_frame: Option<u64>,

    #[arg(long, default_value_t = 8.0, help = "Size of the field jump in X (pixels)")]
    jump_size: f64,

    #[arg(long, default_value_t = 7, help = "Random seed for noise and jitter")]
    seed: u64,

    #[arg(long, help = "Load guiding configuration from a JSON file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Use the single-star strategy")]
    single_star: bool,

    #[arg(short, long, help = "Print reacquisition and admission events")]
    verbose: bool,
}

const FRAME_SIZE: usize = 256;

fn star_layout(count: usize) -> Vec<SyntheticStar> {
    let center = FRAME_SIZE as f64 / 2.0;
    let mut stars = vec![SyntheticStar::new(center, center, 12_000.0)];
    for i in 1..count {
        let angle = i as f64 * std::f64::consts::TAU / (count - 1) as f64;
        let radius = 45.0 + 10.0 * (i % 3) as f64;
        stars.push(SyntheticStar::new(
            center + radius * angle.cos(),
            center + radius * angle.sin(),
            4_000.0 + 1_500.0 * i as f64,
        ));
    }
    stars
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MultiStarConfig::load_from_file(path)?,
        None => MultiStarConfig::default(),
    };
    if args.single_star {
        config.strategy = StrategyKind::SingleStar;
    }

    println!("Multi-star Guiding Replay");
    println!("=========================");
    println!("Strategy: {:?}", config.strategy);
    println!("Frames: {} at {} ms", args.frames, args.interval_ms);
    println!("Stars: {}", args.stars);

    let base = star_layout(args.stars.max(1));
    let lock = PixelPoint::new(base[0].x, base[0].y);
    let controller = SimpleFrameController::guiding_at(lock);
    let mut session = GuidingSession::new(config, CentroidFinder::default(), controller)?;

    let pool: Vec<PixelPoint> = base.iter().map(|s| PixelPoint::new(s.x, s.y)).collect();
    session.select_stars(&pool)?;

    if args.verbose {
        session.register_callback(|event| match event {
            GuideEvent::Reacquired {
                index,
                old_reference,
                new_reference,
                ..
            } => {
                println!(
                    "  star {index} reacquired, reference {:?} -> ({:.2}, {:.2})",
                    old_reference.map(|p| (p.x, p.y)),
                    new_reference.x,
                    new_reference.y
                );
            }
            GuideEvent::Admission(transition) => {
                println!(
                    "  admission {:?} -> {} (distance {:?}, threshold {:?})",
                    transition.event, transition.state, transition.distance, transition.threshold
                );
            }
            GuideEvent::MembershipChanged(summary) => {
                println!(
                    "  contributors {:?} (added {:?}, removed {:?})",
                    summary.used_indices, summary.added, summary.removed
                );
            }
            GuideEvent::Frame(_) => {}
        });
    }

    let jitter = Normal::new(0.0, args.jitter.max(f64::MIN_POSITIVE))?;
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let mut correction = PixelPoint::default();
    let mut outcomes: BTreeMap<String, u64> = BTreeMap::new();
    let mut accepted_sq = 0.0;
    let mut accepted = 0u64;

    for k in 0..args.frames {
        let mut shift = PixelPoint::new(args.drift_x * k as f64, args.drift_y * k as f64)
            + correction
            + PixelPoint::new(jitter.sample(&mut rng), jitter.sample(&mut rng));
        if args.jump_frame.is_some_and(|jump| k >= jump) {
            shift.x += args.jump_size;
        }

        let visible: Vec<SyntheticStar> = base
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                !args
                    .occlusions
                    .iter()
                    .any(|o| o.index == *i && (o.start..=o.end).contains(&k))
            })
            .map(|(_, s)| s.shifted(shift.x, shift.y))
            .collect();

        let frame = render_star_field(
            FRAME_SIZE,
            FRAME_SIZE,
            &visible,
            100.0,
            3.0,
            args.seed.wrapping_add(k),
        );
        let timestamp = Timestamp::from_millis(k * args.interval_ms);
        let result = session.process_frame(frame.view(), timestamp);

        if result.outcome == FrameOutcome::Nominal {
            if let Some(offset) = result.offset {
                correction = correction - PixelPoint::new(
                    offset.camera.x * args.aggressiveness,
                    offset.camera.y * args.aggressiveness,
                );
            }
            accepted_sq += result.distance * result.distance;
            accepted += 1;
        }
        *outcomes.entry(result.outcome.to_string()).or_default() += 1;

        let position = result
            .solution
            .map(|p| format!("({:7.2}, {:7.2})", p.x, p.y))
            .unwrap_or_else(|| "       --        ".to_string());
        println!(
            "frame {k:4}  {:<24} stars {:<5} pos {position}  dist {:6.3}  {}  {}",
            result.outcome.to_string(),
            result.star_count.to_string(),
            result.distance,
            session.checker().state(),
            result.error_info.status
        );
    }

    println!();
    println!("Summary");
    println!("-------");
    for (outcome, count) in &outcomes {
        println!("{outcome:<26} {count}");
    }
    if accepted > 0 {
        println!(
            "RMS distance (accepted): {:.3} px",
            (accepted_sq / accepted as f64).sqrt()
        );
    }
    println!(
        "Peak concurrent stars: {}",
        session.strategy().star_count().max
    );

    Ok(())
}
