use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError};
use ratatui::widgets::TableState;

use crate::bench::{BenchEvent, CategoryCounts, RecordSummary, RunSummary};
use crate::core::config::BenchConfig;

// --- Constants ---
const RECORD_CAPACITY: usize = 500;
const LOG_CAPACITY: usize = 200;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Dashboard,
    Records,
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopping,
    Finished,
    Error,
}

// --- Progress ---

#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub total: usize,
    pub resumed: usize,
    pub skipped: usize,
    pub computed: usize,
    pub checkpointed: usize,
}

impl Progress {
    pub fn done(&self) -> usize {
        self.skipped + self.computed
    }

    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.done() as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}

// --- The Master State ---

pub struct AppState {
    // System
    pub should_quit: bool,
    pub mode: AppMode,
    pub config: BenchConfig,
    pub runs: usize,
    pub dataset_path: String,

    // Worker
    pub rx: Option<Receiver<BenchEvent>>,
    pub stop: Arc<AtomicBool>,
    pub worker_status: WorkerStatus,

    // Benchmark Data
    pub start_time: Instant,
    pub progress: Progress,
    pub counts: CategoryCounts,
    pub records: VecDeque<RecordSummary>,
    pub summary: Option<RunSummary>,
    pub logs: VecDeque<String>,

    // UI Elements
    pub records_state: TableState,
}

impl AppState {
    pub fn new(config: BenchConfig, runs: usize, dataset_path: &str) -> Self {
        Self {
            should_quit: false,
            mode: AppMode::Dashboard,
            config,
            runs,
            dataset_path: dataset_path.to_string(),
            rx: None,
            stop: Arc::new(AtomicBool::new(false)),
            worker_status: WorkerStatus::Starting,
            start_time: Instant::now(),
            progress: Progress::default(),
            counts: CategoryCounts::default(),
            records: VecDeque::with_capacity(RECORD_CAPACITY),
            summary: None,
            logs: VecDeque::with_capacity(LOG_CAPACITY),
            records_state: TableState::default(),
        }
    }

    pub fn set_channel(&mut self, rx: Receiver<BenchEvent>) {
        self.rx = Some(rx);
        self.worker_status = WorkerStatus::Starting;
        self.start_time = Instant::now();
    }

    pub fn tick(&mut self) {
        if let Some(rx) = self.rx.clone() {
            for _ in 0..100 {
                match rx.try_recv() {
                    Ok(evt) => self.handle_event(evt),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if self.worker_status != WorkerStatus::Finished {
                            self.worker_status = WorkerStatus::Error;
                            self.log("Benchmark worker exited without finishing.");
                        }
                        self.rx = None;
                        break;
                    }
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: BenchEvent) {
        match event {
            BenchEvent::Log(msg) => self.log(msg),

            BenchEvent::Started { total, resumed } => {
                self.worker_status = WorkerStatus::Running;
                self.progress.total = total;
                self.progress.resumed = resumed;
                if resumed > 0 {
                    self.log(format!("Resumed from checkpoint: {} structures done", resumed));
                }
            }

            BenchEvent::Skipped(_) => self.progress.skipped += 1,

            BenchEvent::StructureDone(line) => {
                self.progress.computed += 1;
                self.counts.add(line.category);
                if self.records.len() >= RECORD_CAPACITY {
                    self.records.pop_front();
                }
                self.records.push_back(line);
            }

            BenchEvent::Checkpointed { processed } => self.progress.checkpointed = processed,

            BenchEvent::Finished(summary) => {
                self.worker_status = WorkerStatus::Finished;
                self.log(if summary.stopped {
                    format!("Stopped after {} structures; checkpoint saved.", summary.computed)
                } else {
                    format!("Finished in {:.1} s.", summary.elapsed_secs)
                });
                // Resumed records are only known from the store.
                self.counts = summary.counts.clone();
                self.summary = Some(summary);
            }
        }
    }

    fn log(&mut self, msg: impl Into<String>) {
        if self.logs.len() >= LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(msg.into());
    }

    /// Stop between structures; quit right away once the worker is done.
    pub fn request_quit(&mut self) {
        match self.worker_status {
            WorkerStatus::Finished | WorkerStatus::Error => self.should_quit = true,
            WorkerStatus::Stopping => {}
            WorkerStatus::Starting | WorkerStatus::Running => {
                self.stop.store(true, Ordering::Relaxed);
                self.worker_status = WorkerStatus::Stopping;
                self.log("Stop requested: finishing the current structure...");
            }
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        match &self.summary {
            Some(s) => s.elapsed_secs,
            None => self.start_time.elapsed().as_secs_f64(),
        }
    }

    // --- Input Handling ---

    pub fn on_key(&mut self, key: char) {
        match key {
            'q' => self.request_quit(),
            '1' => self.mode = AppMode::Dashboard,
            '2' => self.mode = AppMode::Records,
            '3' => self.mode = AppMode::Config,
            'j' => self.select_next_record(),
            'k' => self.select_prev_record(),
            _ => {}
        }
    }

    fn select_next_record(&mut self) {
        if self.records.is_empty() { return; }
        let i = match self.records_state.selected() {
            Some(i) => if i >= self.records.len() - 1 { 0 } else { i + 1 },
            None => 0,
        };
        self.records_state.select(Some(i));
    }

    fn select_prev_record(&mut self) {
        if self.records.is_empty() { return; }
        let i = match self.records_state.selected() {
            Some(i) => if i == 0 { self.records.len() - 1 } else { i - 1 },
            None => 0,
        };
        self.records_state.select(Some(i));
    }
}
