use std::io;
use std::panic;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{info, LevelFilter};
use ratatui::{backend::CrosstermBackend, Terminal};

use smartneb::core::config::{EvaluatorConfig, NebConfig};
use smartneb::interface::state::AppState;
use smartneb::interface::ui;
use smartneb::io::xyz;
use smartneb::solvers::smart_neb::{ChainInput, NebOutcome, SmartNeb};
use smartneb::solvers::SchedulerEvent;

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "smartneb: staged nudged elastic band transition-state search", long_about = None)]
struct Args {
    /// Reactant structure, or a multi-frame initial chain when no product is given
    reactant: PathBuf,

    /// Product structure
    product: Option<PathBuf>,

    /// JSON run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of images, endpoints included
    #[arg(short = 'n', long)]
    nimages: Option<usize>,

    /// Interpolation scheme (linear, idpp, boc, lst, external:<flag>)
    #[arg(long)]
    scheme: Option<String>,

    /// Intermediate structure the initial chain must pass through
    #[arg(long)]
    waypoint: Option<PathBuf>,

    /// Convergence threshold on the max per-atom NEB force
    #[arg(long)]
    fmax: Option<f64>,

    #[arg(long)]
    max_cycles: Option<usize>,

    /// Derive spring constants from the initial image spacing
    #[arg(long)]
    keep_image_distance: bool,

    /// Evaluate all stale images in a single evaluator call
    #[arg(long)]
    batch: bool,

    /// External evaluator command; `{input}` expands to the input file
    #[arg(long)]
    evaluator_cmd: Option<String>,

    /// Directory for neb-images.xyz, ts.xyz and the summaries
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Number of worker threads for the IDPP objective (0 = all cores)
    #[arg(short = 'j', long, default_value_t = 0)]
    threads: usize,

    /// Plain log output instead of the dashboard
    #[arg(long)]
    headless: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// --- Terminal Guard (RAII) ---

struct TuiContext {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TuiContext {
    fn new() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
            .context("Failed to setup terminal alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend).context("Failed to create terminal backend")?;
        Ok(Self { terminal })
    }
}

impl Drop for TuiContext {
    fn drop(&mut self) {
        // Best-effort restoration of terminal state
        let _ = disable_raw_mode();
        let _ = execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        );
        let _ = self.terminal.show_cursor();
    }
}

// --- Initialization Helpers ---

fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // Forcefully restore terminal before printing panic
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));
}

fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn build_config(args: &Args) -> Result<NebConfig> {
    let mut config = match &args.config {
        Some(path) => NebConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => NebConfig::default(),
    };

    if let Some(n) = args.nimages {
        config.nimages = n;
    }
    if let Some(scheme) = &args.scheme {
        config.interpolation.scheme = scheme.parse()?;
    }
    if let Some(fmax) = args.fmax {
        config.fmax = fmax;
    }
    if let Some(n) = args.max_cycles {
        config.max_cycles = n;
    }
    if args.keep_image_distance {
        config.keep_image_distance = true;
    }
    if args.batch {
        config.batch = true;
    }
    if let Some(cmd) = &args.evaluator_cmd {
        config.evaluator = EvaluatorConfig::External {
            command: cmd.clone(),
            scratch_root: None,
        };
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = Some(dir.clone());
    }
    if config.output_dir.is_none() {
        config.output_dir = Some(PathBuf::from("."));
    }

    config.validate()?;
    Ok(config)
}

fn load_input(args: &Args) -> Result<ChainInput> {
    let mut frames = xyz::read_all(&args.reactant)
        .with_context(|| format!("Failed to read {}", args.reactant.display()))?;

    match &args.product {
        Some(path) => {
            let product = xyz::read_one(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let waypoint = match &args.waypoint {
                Some(w) => Some(
                    xyz::read_one(w).with_context(|| format!("Failed to read {}", w.display()))?,
                ),
                None => None,
            };
            Ok(ChainInput::Endpoints {
                reactant: frames.swap_remove(0),
                product,
                waypoint,
            })
        }
        None if frames.len() >= 3 => {
            if args.waypoint.is_some() {
                bail!("--waypoint requires a reactant and a product structure");
            }
            Ok(ChainInput::Images(frames))
        }
        None => bail!(
            "{} holds {} frame(s): give a product structure or a chain of at least 3 images",
            args.reactant.display(),
            frames.len()
        ),
    }
}

fn report(outcome: &NebOutcome) {
    println!("{}", outcome.profile);
    println!(
        "converged: {} after {} cycle(s), final fmax = {:.5}",
        outcome.converged, outcome.cycles, outcome.final_fmax
    );
    println!("total number of energy calls: {}", outcome.evaluator_calls);
    println!("{:?}", outcome.chain.evaluation_counts());
}

// --- Run Modes ---

fn run_headless(config: NebConfig, input: ChainInput) -> Result<NebOutcome> {
    let outcome = SmartNeb::from_config(config)?
        .run(input)
        .context("NEB run failed")?;
    report(&outcome);
    Ok(outcome)
}

fn run_dashboard(config: NebConfig, input: ChainInput) -> Result<NebOutcome> {
    setup_panic_hook();

    let mut tui = TuiContext::new().context("Failed to initialize TUI")?;
    let mut app = AppState::new(config.clone());

    // Spawn scheduler thread
    let (tx, rx) = unbounded();
    app.set_channel(rx);

    let worker = thread::Builder::new()
        .name("NEB-Worker".to_string())
        .spawn(move || {
            let _ = tx.send(SchedulerEvent::Log("Worker started.".to_string()));
            let result = SmartNeb::from_config(config).and_then(|neb| neb.with_events(tx.clone()).run(input));
            if let Err(e) = &result {
                let _ = tx.send(SchedulerEvent::Error(e.to_string()));
            }
            result
        })?;

    // Event loop
    let tick_rate = Duration::from_millis(50); // 20 FPS
    let mut last_tick = Instant::now();

    while !app.should_quit {
        tui.terminal.draw(|f| ui::draw(f, &mut app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == event::KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char(c) => app.on_key(c),
                        KeyCode::Esc => app.should_quit = true,
                        KeyCode::Down => app.on_key('j'),
                        KeyCode::Up => app.on_key('k'),
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick();
            last_tick = Instant::now();
        }
    }
    drop(tui);

    if !worker.is_finished() {
        bail!("interrupted before the NEB run finished");
    }
    let outcome = worker
        .join()
        .map_err(|_| anyhow!("NEB worker panicked"))?
        .context("NEB run failed")?;
    report(&outcome);
    Ok(outcome)
}

fn run() -> Result<bool> {
    let args = Args::parse();
    let level = log_level(args.verbose);

    let config = build_config(&args)?;
    if args.dump_config {
        println!("{}", config.to_json()?);
        return Ok(true);
    }

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    if args.headless {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .init();
    } else {
        tui_logger::init_logger(level).map_err(|e| anyhow!("Failed to init logger: {:?}", e))?;
        tui_logger::set_default_level(level);
    }

    let input = load_input(&args)?;
    info!(
        "{} images, {} interpolation, target fmax {}",
        config.nimages, config.interpolation.scheme, config.fmax
    );

    let outcome = if args.headless {
        run_headless(config, input)?
    } else {
        run_dashboard(config, input)?
    };
    Ok(outcome.converged)
}

// --- Main ---

fn main() {
    match run() {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {:?}", e);
            std::process::exit(1);
        }
    }
}
