use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::domain::{Geometry, StructureId, TraceEntry};
use crate::core::error::{BenchError, BenchResult};
use crate::engine::calculator::Evaluation;

/// Receives every step of a relaxation. Failures disable output for the
/// current run only; they never abort the relaxation.
pub trait TrajectorySink {
    fn begin(&mut self, id: &StructureId, run_index: usize) -> BenchResult<()>;

    fn frame(
        &mut self,
        entry: &TraceEntry,
        geometry: &Geometry,
        evaluation: &Evaluation,
    ) -> BenchResult<()>;

    fn end(&mut self) -> BenchResult<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TrajectorySink for NullSink {
    fn begin(&mut self, _id: &StructureId, _run_index: usize) -> BenchResult<()> {
        Ok(())
    }

    fn frame(&mut self, _: &TraceEntry, _: &Geometry, _: &Evaluation) -> BenchResult<()> {
        Ok(())
    }

    fn end(&mut self) -> BenchResult<()> {
        Ok(())
    }
}

/// Keeps the per-step trace of the most recent run in memory.
#[derive(Debug, Default, Clone)]
pub struct TraceRecorder {
    pub entries: Vec<TraceEntry>,
}

impl TrajectorySink for TraceRecorder {
    fn begin(&mut self, _id: &StructureId, _run_index: usize) -> BenchResult<()> {
        self.entries.clear();
        Ok(())
    }

    fn frame(&mut self, entry: &TraceEntry, _: &Geometry, _: &Evaluation) -> BenchResult<()> {
        self.entries.push(*entry);
        Ok(())
    }

    fn end(&mut self) -> BenchResult<()> {
        Ok(())
    }
}

struct OpenRun {
    traj_path: PathBuf,
    log_path: PathBuf,
    traj: BufWriter<File>,
    log: csv::Writer<File>,
}

/// Writes `traj/{id}_{run}.extxyz` (positions, energy, forces per step) and
/// `log/{id}_{run}.csv` (step, energy, fmax) below an output directory.
pub struct RunLogWriter {
    traj_dir: PathBuf,
    log_dir: PathBuf,
    current: Option<OpenRun>,
}

impl RunLogWriter {
    pub fn new(output_dir: &Path) -> BenchResult<Self> {
        let traj_dir = output_dir.join("traj");
        let log_dir = output_dir.join("log");
        fs::create_dir_all(&traj_dir).map_err(|e| BenchError::io(&traj_dir, e))?;
        fs::create_dir_all(&log_dir).map_err(|e| BenchError::io(&log_dir, e))?;
        Ok(Self { traj_dir, log_dir, current: None })
    }
}

impl TrajectorySink for RunLogWriter {
    fn begin(&mut self, id: &StructureId, run_index: usize) -> BenchResult<()> {
        let stem = format!("{}_{}", id, run_index);
        let traj_path = self.traj_dir.join(format!("{}.extxyz", stem));
        let log_path = self.log_dir.join(format!("{}.csv", stem));

        let traj = File::create(&traj_path).map_err(|e| BenchError::io(&traj_path, e))?;
        let mut log = csv::Writer::from_path(&log_path)
            .map_err(|e| BenchError::io(&log_path, e.into()))?;
        log.write_record(["step", "energy", "fmax"])
            .map_err(|e| BenchError::io(&log_path, e.into()))?;

        self.current = Some(OpenRun {
            traj_path,
            log_path,
            traj: BufWriter::new(traj),
            log,
        });
        Ok(())
    }

    fn frame(
        &mut self,
        entry: &TraceEntry,
        geometry: &Geometry,
        evaluation: &Evaluation,
    ) -> BenchResult<()> {
        let Some(run) = self.current.as_mut() else { return Ok(()) };

        run.log
            .write_record([
                entry.step.to_string(),
                format!("{:.8}", entry.energy),
                format!("{:.6}", entry.fmax),
            ])
            .map_err(|e| BenchError::io(&run.log_path, e.into()))?;

        write_extxyz_frame(&mut run.traj, geometry, evaluation)
            .map_err(|e| BenchError::io(&run.traj_path, e))
    }

    fn end(&mut self) -> BenchResult<()> {
        if let Some(mut run) = self.current.take() {
            run.log.flush().map_err(|e| BenchError::io(&run.log_path, e))?;
            run.traj.flush().map_err(|e| BenchError::io(&run.traj_path, e))?;
        }
        Ok(())
    }
}

fn write_extxyz_frame(
    out: &mut impl Write,
    geometry: &Geometry,
    evaluation: &Evaluation,
) -> std::io::Result<()> {
    writeln!(out, "{}", geometry.len())?;

    let mut header = String::with_capacity(256);
    if let Some(lat) = &geometry.lattice {
        let r = lat.rows();
        header.push_str(&format!(
            "Lattice=\"{:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9}\" pbc=\"T T T\" ",
            r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2]
        ));
    }
    header.push_str("Properties=species:S:1:pos:R:3:forces:R:3:move_mask:L:1 ");
    header.push_str(&format!("energy={:.9}", evaluation.energy));
    writeln!(out, "{}", header)?;

    for (i, p) in geometry.positions.iter().enumerate() {
        let f = evaluation.forces[i];
        let free = if geometry.fixed.get(i).copied().unwrap_or(false) { "F" } else { "T" };
        writeln!(
            out,
            "{:<3} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {}",
            geometry.species[i], p.x, p.y, p.z, f.x, f.y, f.z, free
        )?;
    }
    Ok(())
}
