use std::env;
use std::io;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::LevelFilter;
use ratatui::{backend::CrosstermBackend, Terminal};

use catbench::bench::runner::Benchmark;
use catbench::bench::{BenchEvent, RunSummary};
use catbench::core::config::{BenchConfig, CalculationMode, OptimizerKind};
use catbench::core::dataset::Dataset;
use catbench::engine::calculator::{CalculatorAdapter, Corrected};
use catbench::engine::external::process::ExternalCalculator;
use catbench::interface::state::AppState;
use catbench::interface::ui;

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "CatBench: MLIP benchmarking against DFT for catalysis", long_about = None)]
struct Args {
    /// Benchmark dataset (JSON)
    #[arg(short, long)]
    dataset: PathBuf,

    /// Calculator worker program speaking the line protocol on stdin/stdout
    #[arg(short, long)]
    calculator: String,

    /// Extra argument passed to the calculator program (repeatable)
    #[arg(long = "calc-arg", allow_hyphen_values = true)]
    calc_args: Vec<String>,

    /// Optional correction program (e.g. dispersion) added on top of the calculator
    #[arg(long)]
    correction: Option<String>,

    /// JSON configuration file; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// MLIP name, used for the output directory
    #[arg(short, long)]
    mlip_name: Option<String>,

    /// Benchmark name (defaults to the dataset name)
    #[arg(short, long)]
    benchmark: Option<String>,

    /// Number of independent reproducibility runs
    #[arg(short = 'n', long, default_value_t = 3)]
    runs: usize,

    /// relaxation or direct
    #[arg(long)]
    mode: Option<String>,

    /// LBFGS, BFGS or FIRE
    #[arg(long)]
    optimizer: Option<OptimizerKind>,

    /// Force convergence criterion (eV/Å)
    #[arg(long)]
    fmax: Option<f64>,

    /// Maximum optimizer steps per relaxation
    #[arg(long)]
    steps: Option<usize>,

    /// Scale factor of L-BFGS steps
    #[arg(long)]
    damping: Option<f64>,

    /// Flush the checkpoint every N structures
    #[arg(long)]
    save_step: Option<usize>,

    /// Root directory of the results
    #[arg(long)]
    result_dir: Option<PathBuf>,

    /// Write extxyz trajectories and csv step logs for every run
    #[arg(long)]
    save_trajectory: bool,

    /// Run without the terminal monitor
    #[arg(long)]
    headless: bool,
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

fn build_config(args: &Args, dataset: &Dataset) -> Result<BenchConfig> {
    let mut config = match &args.config {
        Some(path) => BenchConfig::from_json_file(path)?,
        None => BenchConfig::default(),
    };

    if let Some(name) = &args.mlip_name {
        config.mlip_name = name.clone();
    }
    if let Some(bench) = &args.benchmark {
        config.benchmark = bench.clone();
    }
    if config.benchmark.is_empty() {
        config.benchmark = dataset.name.clone();
    }
    if let Some(mode) = &args.mode {
        config.mode = match mode.to_ascii_lowercase().as_str() {
            "relaxation" | "relax" => CalculationMode::Relaxation,
            "direct" => CalculationMode::Direct,
            other => bail!("unknown mode '{}' (relaxation, direct)", other),
        };
    }
    if let Some(opt) = args.optimizer {
        config.optimizer = opt;
    }
    if let Some(fmax) = args.fmax {
        config.f_crit_relax = fmax;
    }
    if let Some(steps) = args.steps {
        config.n_crit_relax = steps;
    }
    if let Some(damping) = args.damping {
        config.damping = damping;
    }
    if let Some(save_step) = args.save_step {
        config.save_step = save_step;
    }
    if let Some(dir) = &args.result_dir {
        config.result_dir = dir.clone();
    }
    if args.save_trajectory {
        config.save_trajectory = true;
    }

    config.validate()?;
    Ok(config)
}

fn check_program(program: &str) -> Result<()> {
    let found = if program.contains(std::path::MAIN_SEPARATOR) {
        Path::new(program).is_file()
    } else {
        env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
            .unwrap_or(false)
    };
    if !found {
        return Err(anyhow!(
            "Dependency Check Failed: '{}' not found.\n\
             The calculator must be an executable speaking the catbench line protocol.",
            program
        ));
    }
    Ok(())
}

/// One independently started calculator per reproducibility run.
fn build_calculators(args: &Args, config: &BenchConfig) -> Result<Vec<CalculatorAdapter>> {
    if args.runs == 0 {
        bail!("--runs must be at least 1");
    }
    (0..args.runs)
        .map(|run| {
            let base = ExternalCalculator::new(&args.calculator, &args.calc_args, run)?;
            Ok(match (config.mode, &args.correction) {
                (CalculationMode::Direct, _) => CalculatorAdapter::direct(base),
                (CalculationMode::Relaxation, None) => CalculatorAdapter::relaxing(base),
                (CalculationMode::Relaxation, Some(prog)) => {
                    let correction = ExternalCalculator::new(prog, &[], run)?;
                    CalculatorAdapter::relaxing(Corrected::new(base, correction))
                }
            })
        })
        .collect()
}

fn print_summary(summary: &RunSummary, config: &BenchConfig) {
    println!(
        "{} on {}: {} computed, {} resumed, {} total in {:.1} s{}",
        config.mlip_name,
        config.benchmark,
        summary.computed,
        summary.skipped,
        summary.total,
        summary.elapsed_secs,
        if summary.stopped { " (stopped)" } else { "" }
    );
    for (category, n) in &summary.counts.by_category {
        println!("  {:<16} {}", category.label(), n);
    }
    if summary.counts.fully_faulted > 0 {
        println!("  {:<16} {}", "all runs faulted", summary.counts.fully_faulted);
    }
    println!("Results in {}", config.output_dir().display());
}

fn run_headless(rx: Receiver<BenchEvent>) {
    for event in rx {
        match event {
            BenchEvent::Log(msg) => eprintln!("{}", msg),
            BenchEvent::Started { total, resumed } => {
                eprintln!("Benchmark started: {} structures ({} from checkpoint)", total, resumed)
            }
            BenchEvent::Checkpointed { processed } => {
                eprintln!("Checkpoint: {} structures", processed)
            }
            // Per-structure lines already go through the logger.
            BenchEvent::StructureDone(_) | BenchEvent::Skipped(_) | BenchEvent::Finished(_) => {}
        }
    }
}

// --- Main ---

fn main() -> Result<()> {
    // 1. Safety & Parsing
    setup_panic_hook();
    let args = Args::parse();

    // 2. Pre-flight Checks
    check_program(&args.calculator)?;
    if let Some(prog) = &args.correction {
        check_program(prog)?;
    }

    // 3. Inputs
    let dataset = Dataset::from_json_file(&args.dataset)
        .with_context(|| format!("Failed to load dataset {}", args.dataset.display()))?;
    let config = build_config(&args, &dataset).context("Invalid configuration")?;
    let calculators = build_calculators(&args, &config)?;
    let benchmark = Benchmark::new(config.clone(), calculators)?;

    // 4. Logging
    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    } else {
        tui_logger::init_logger(LevelFilter::Debug).map_err(|e| anyhow!("{:?}", e))?;
        tui_logger::set_default_level(LevelFilter::Info);
    }

    let mut app = AppState::new(config.clone(), benchmark.runs(), &args.dataset.display().to_string());
    let stop: Arc<AtomicBool> = app.stop.clone();

    // 5. Spawn Benchmark Thread
    let (tx, rx) = unbounded();
    let worker = thread::Builder::new()
        .name("Benchmark-Worker".to_string())
        .spawn(move || {
            let result = benchmark.run(&dataset, &tx, &stop);
            if let Err(e) = &result {
                log::error!("Benchmark aborted: {}", e);
                let _ = tx.send(BenchEvent::Log(format!("Benchmark aborted: {}", e)));
            }
            result
        })?;

    if args.headless {
        run_headless(rx);
    } else {
        let mut tui = TuiContext::new().context("Failed to initialize TUI")?;
        app.set_channel(rx);

        // 6. Event Loop
        let tick_rate = Duration::from_millis(100);
        let mut last_tick = Instant::now();

        while !app.should_quit {
            tui.terminal.draw(|f| ui::draw(f, &mut app))?;

            let timeout = tick_rate.saturating_sub(last_tick.elapsed());
            if crossterm::event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == event::KeyEventKind::Press {
                        match key.code {
                            KeyCode::Char(c) => app.on_key(c),
                            KeyCode::Esc => app.request_quit(),
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
    }

    // 7. Report
    let summary = worker
        .join()
        .map_err(|_| anyhow!("benchmark worker panicked"))??;
    print_summary(&summary, &config);
    Ok(())
}
