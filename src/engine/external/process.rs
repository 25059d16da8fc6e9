use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};
use nalgebra::Vector3;
use parking_lot::Mutex;
use regex::Regex;

use crate::core::domain::{Geometry, Lattice, StructureRecord};
use crate::core::error::CalculationFault;
use crate::engine::calculator::{Calculator, DirectPredictor, Evaluation, StructurePair};

/// Environment variable telling a worker which reproducibility run it serves.
pub const RUN_INDEX_ENV: &str = "CATBENCH_RUN_INDEX";

/// How long a worker may take to exit once its stdin is closed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Drives a long-lived external model server through a line protocol.
///
/// Request (stdin):
/// ```text
/// evaluate <natoms>            | predict <natoms> <natoms_clean>
/// cell <9 floats, rows a b c>  | cell none
/// <symbol> <x> <y> <z>         (natoms lines, then the clean slab for predict)
/// ```
/// Response (stdout): `energy = <value>`, then for `evaluate` a `forces` line
/// followed by natoms `<fx> <fy> <fz>` lines, then `end`. A line starting with
/// `error` reports a model failure.
pub struct ExternalCalculator {
    name: String,
    program: String,
    args: Vec<String>,
    run_index: usize,
    worker: Mutex<Option<Worker>>,
    energy_re: Regex,
}

impl ExternalCalculator {
    /// # Arguments
    /// * `program` - Path to the model server executable.
    /// * `args` - Extra arguments (model path, device, ...).
    /// * `run_index` - Exported to the worker so independent instances can seed differently.
    pub fn new(program: &str, args: &[String], run_index: usize) -> Result<Self> {
        let energy_re = Regex::new(r"^\s*energy\s*=\s*(\S+)").context("energy pattern")?;
        Ok(Self {
            name: format!("{} #{}", program, run_index),
            program: program.to_string(),
            args: args.to_vec(),
            run_index,
            worker: Mutex::new(None),
            energy_re,
        })
    }

    fn spawn(&self) -> Result<Worker> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(RUN_INDEX_ENV, self.run_index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn calculator '{}'", self.program))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("calculator stdin unavailable"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("calculator stdout unavailable"))?;
        debug!("Spawned calculator worker {} (pid {})", self.name, child.id());

        Ok(Worker { child, stdin, stdout: BufReader::new(stdout) })
    }

    /// Sends one request and returns the response lines up to `end`.
    /// A broken worker is dropped so the next request starts a fresh one.
    fn exchange(&self, request: &str) -> Result<Vec<String>> {
        let mut guard = self.worker.lock();
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        let result = match guard.as_mut() {
            Some(worker) => Self::round_trip(worker, request),
            None => Err(anyhow!("calculator worker unavailable")),
        };
        if result.is_err() {
            if let Some(mut worker) = guard.take() {
                let _ = worker.child.kill();
                let _ = worker.child.wait();
            }
        }
        result
    }

    fn round_trip(worker: &mut Worker, request: &str) -> Result<Vec<String>> {
        worker
            .stdin
            .write_all(request.as_bytes())
            .context("Failed to write to calculator stdin")?;
        worker.stdin.flush().context("Failed to flush calculator stdin")?;

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = worker
                .stdout
                .read_line(&mut line)
                .context("Failed to read calculator output")?;
            if n == 0 {
                bail!("calculator exited before finishing its response");
            }
            let line = line.trim_end().to_string();
            if line == "end" {
                return Ok(lines);
            }
            if let Some(msg) = line.strip_prefix("error") {
                bail!("model error:{}", msg);
            }
            lines.push(line);
        }
    }

    fn parse_energy(&self, lines: &[String]) -> Result<f64> {
        for line in lines {
            if let Some(caps) = self.energy_re.captures(line) {
                return caps[1]
                    .parse::<f64>()
                    .with_context(|| format!("Failed to parse energy '{}'", &caps[1]));
            }
        }
        bail!("Could not find energy in calculator output");
    }

    fn parse_forces(&self, lines: &[String], expected_atoms: usize) -> Result<Vec<Vector3<f64>>> {
        let start = lines
            .iter()
            .position(|l| l.trim() == "forces")
            .ok_or_else(|| anyhow!("No forces block in calculator output"))?;

        let mut forces = Vec::with_capacity(expected_atoms);
        for line in lines.iter().skip(start + 1).take(expected_atoms) {
            let parts: Vec<f64> = line
                .split_whitespace()
                .map(|t| t.parse::<f64>())
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("Malformed force line '{}'", line))?;
            if parts.len() != 3 {
                bail!("Malformed force line '{}'", line);
            }
            forces.push(Vector3::new(parts[0], parts[1], parts[2]));
        }

        // STRICT VALIDATION
        if forces.len() != expected_atoms {
            bail!("force count mismatch: expected {}, got {}", expected_atoms, forces.len());
        }
        Ok(forces)
    }
}

fn push_structure(s: &mut String, species: &[String], geometry_positions: &[nalgebra::Point3<f64>]) {
    for (symbol, p) in species.iter().zip(geometry_positions.iter()) {
        s.push_str(&format!("{:<3} {:.9} {:.9} {:.9}\n", symbol, p.x, p.y, p.z));
    }
}

fn push_cell(s: &mut String, lattice: Option<&Lattice>) {
    match lattice {
        Some(lat) => {
            let r = lat.rows();
            s.push_str(&format!(
                "cell {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9}\n",
                r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2]
            ));
        }
        None => s.push_str("cell none\n"),
    }
}

fn evaluate_request(geometry: &Geometry) -> String {
    let mut s = String::with_capacity(64 + geometry.len() * 48);
    s.push_str(&format!("evaluate {}\n", geometry.len()));
    push_cell(&mut s, geometry.lattice.as_ref());
    push_structure(&mut s, &geometry.species, &geometry.positions);
    s
}

fn predict_request(structure: &StructureRecord, clean: Option<&StructureRecord>) -> String {
    let n_clean = clean.map(|c| c.len()).unwrap_or(0);
    let mut s = String::with_capacity(64 + (structure.len() + n_clean) * 48);
    s.push_str(&format!("predict {} {}\n", structure.len(), n_clean));
    push_cell(&mut s, structure.cell.as_ref());
    push_structure(&mut s, &structure.species, &structure.positions);
    if let Some(clean) = clean {
        push_structure(&mut s, &clean.species, &clean.positions);
    }
    s
}

impl Calculator for ExternalCalculator {
    fn evaluate(&self, geometry: &Geometry) -> Result<Evaluation, CalculationFault> {
        let lines = self
            .exchange(&evaluate_request(geometry))
            .map_err(|e| CalculationFault::Raised(format!("{:#}", e)))?;

        let energy = self
            .parse_energy(&lines)
            .map_err(|e| CalculationFault::Raised(format!("{:#}", e)))?;
        let forces = self
            .parse_forces(&lines, geometry.len())
            .map_err(|e| CalculationFault::Raised(format!("{:#}", e)))?;

        Ok(Evaluation { energy, forces })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl DirectPredictor for ExternalCalculator {
    fn predict(&self, pair: StructurePair<'_>) -> Result<f64, CalculationFault> {
        let lines = self
            .exchange(&predict_request(pair.structure, pair.clean_slab))
            .map_err(|e| CalculationFault::Raised(format!("{:#}", e)))?;
        self.parse_energy(&lines)
            .map_err(|e| CalculationFault::Raised(format!("{:#}", e)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ExternalCalculator {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.get_mut().take() {
            // Closing stdin lets a well-behaved server exit on its own.
            drop(worker.stdin);
            let deadline = Instant::now() + SHUTDOWN_GRACE;
            loop {
                match worker.child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) if Instant::now() < deadline => thread::sleep(SHUTDOWN_POLL),
                    _ => break,
                }
            }
            warn!("Calculator worker {} did not exit after stdin closed; killing it", self.name);
            if let Err(e) = worker.child.kill() {
                warn!("Failed to stop calculator worker {}: {}", self.name, e);
            }
            let _ = worker.child.wait();
        }
    }
}
