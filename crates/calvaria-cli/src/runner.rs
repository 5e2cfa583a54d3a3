//! Job runner: builds the phantom and transducer, plans, and writes reports.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use nalgebra::Vector3;

use calvaria_compute::{ComputeBackend, SerialBackend};
use calvaria_core::envelope::{EnvelopeGrid, EnvelopeImage};
use calvaria_core::report::{
    incidence_histogram, sdr_histogram, summarise, write_act, write_beam_paths, write_skull_measures, Histogram,
    PlanSummary,
};
use calvaria_core::thermal::{compute_thermal_dose, ThermometrySeries};
use calvaria_core::{CorrectionVector, CtVolume, PlanSession, RayBatch, RayTracePlanner, Target};
use calvaria_geometry::parsers::elements::load_elements;
use calvaria_geometry::transducer::TransducerGeometry;

use crate::config::{ElementSource, EnvelopeConfig, JobConfig};

/// Everything a run produces.
pub struct PlanOutput {
    pub batch: Arc<RayBatch>,
    pub correction: Arc<CorrectionVector>,
    pub envelope: Option<Arc<EnvelopeImage>>,
    pub summary: PlanSummary,
}

/// JSON summary document.
#[derive(serde::Serialize)]
struct SummaryDocument<'a> {
    version: &'a str,
    method: &'a str,
    summary: &'a PlanSummary,
    incidence_histogram: Histogram,
    sdr_histogram: Histogram,
    beam_value: Option<f64>,
    correction: &'a CorrectionVector,
}

pub fn build_volume(job: &JobConfig) -> Result<CtVolume> {
    let v = &job.volume;
    CtVolume::phantom(&v.layers, v.dims, v.spacing, v.background_hu).context("Cannot build phantom volume")
}

pub fn build_geometry(job: &JobConfig) -> Result<TransducerGeometry> {
    let geometry = match &job.transducer.source {
        ElementSource::Hemisphere {
            radius_mm,
            elements,
            aperture_deg,
        } => TransducerGeometry::hemisphere(*radius_mm, *elements, *aperture_deg)
            .context("Cannot generate hemispherical array")?,
        ElementSource::File { element_file } => load_elements(element_file)
            .with_context(|| format!("Cannot load element file {}", element_file.display()))?,
    };
    Ok(geometry.with_tilt(job.transducer.tilt_x_deg, job.transducer.tilt_y_deg))
}

fn build_target(job: &JobConfig) -> Target {
    Target {
        natural_focus: Vector3::from(job.target.natural_focus),
        steering: Vector3::from(job.target.steering),
    }
}

fn envelope_grid(cfg: &EnvelopeConfig) -> EnvelopeGrid {
    match cfg.mode.as_str() {
        "export" => EnvelopeGrid::export(),
        "slice" => EnvelopeGrid::slice_xy(cfg.slice_half_extent_mm, cfg.slice_points),
        _ => EnvelopeGrid::interactive(),
    }
}

/// Session for a job, with its configured backend.
pub fn build_session(job: &JobConfig) -> Result<PlanSession> {
    let backend = create_backend(&job.compute.backend, job.compute.threads)?;
    let planner = RayTracePlanner::new(backend);
    Ok(PlanSession::with_planner(
        Box::new(planner),
        build_geometry(job)?,
        build_target(job),
        job.params.clone(),
    ))
}

/// Run a full plan from a parsed job configuration.
pub fn run_plan(job: &JobConfig) -> Result<PlanOutput> {
    let volume = build_volume(job)?;
    println!(
        "  Volume: {}x{}x{} voxels, {} layer(s)",
        job.volume.dims[0],
        job.volume.dims[1],
        job.volume.dims[2],
        job.volume.layers.len()
    );

    let mut session = build_session(job)?;
    log::info!("Planning with {} ({})", session.method_name(), job.compute.backend);
    println!("  Transducer: {} elements", session.geometry().element_count());

    let batch = session.recompute(Some(&volume)).context("Ray tracing failed")?;
    let correction = session.correction()?;
    let summary = summarise(&batch.rays);
    println!(
        "  Active elements: {}/{} (mean SDR {:.3}, mean incidence {:.1} deg)",
        summary.active_count, summary.element_count, summary.mean_sdr, summary.mean_incidence_deg
    );
    if summary.active_count == 0 {
        eprintln!("Warning: no element reaches the target through bone");
    }

    let envelope = if job.envelope.enabled {
        let image = session.envelope(&envelope_grid(&job.envelope))?;
        println!("  Envelope {:?}: beam value {:.3}", image.dims, image.beam_value);
        Some(image)
    } else {
        None
    };

    Ok(PlanOutput {
        batch,
        correction,
        envelope,
        summary,
    })
}

fn create_file(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Write every report for a finished plan into `out_dir`.
pub fn write_outputs(output: &PlanOutput, job: &JobConfig, out_dir: &Path) -> Result<()> {
    let ext = match job.output.delimiter {
        calvaria_core::report::Delimiter::Tab => "tsv",
        calvaria_core::report::Delimiter::Comma => "csv",
    };
    let measures = out_dir.join(format!("skull_measures.{}", ext));
    let mut w = create_file(&measures)?;
    write_skull_measures(&mut w, &output.batch.rays, job.output.delimiter)?;
    w.flush()?;
    println!("Skull measures written to: {}", measures.display());

    let act = out_dir.join("phases.act");
    let mut w = create_file(&act)?;
    write_act(&mut w, &output.correction, job.output.act_format)?;
    w.flush()?;
    println!("ACT file written to: {}", act.display());

    if job.output.save_beam_paths {
        let paths = out_dir.join("beam_paths.txt");
        let mut w = create_file(&paths)?;
        write_beam_paths(&mut w, &output.batch.rays, &output.batch.target)?;
        w.flush()?;
        println!("Beam paths written to: {}", paths.display());
    }

    if let Some(image) = &output.envelope {
        let path = out_dir.join("envelope.csv");
        write_envelope_csv(image, &path)?;
    }

    if job.output.save_json {
        let path = out_dir.join("summary.json");
        write_summary_json(output, &path)?;
    }
    Ok(())
}

fn write_envelope_csv(image: &EnvelopeImage, path: &Path) -> Result<()> {
    let mut file = create_file(path)?;
    writeln!(file, "# Calvaria pressure envelope")?;
    writeln!(file, "# Grid: {}x{}x{}", image.dims[0], image.dims[1], image.dims[2])?;
    writeln!(file, "# Beam value: {:.6}", image.beam_value)?;
    writeln!(file, "x_mm,y_mm,z_mm,relative_pressure")?;
    let [nx, ny, nz] = image.dims;
    for ix in 0..nx {
        for iy in 0..ny {
            for iz in 0..nz {
                let p = image.position(ix, iy, iz);
                let v = image.value(ix, iy, iz).unwrap_or(0.0);
                writeln!(file, "{:.3},{:.3},{:.3},{:.6e}", p.x, p.y, p.z, v)?;
            }
        }
    }
    file.flush()?;
    println!("Envelope written to: {}", path.display());
    Ok(())
}

fn write_summary_json(output: &PlanOutput, path: &Path) -> Result<()> {
    let doc = SummaryDocument {
        version: env!("CARGO_PKG_VERSION"),
        method: "Ray tracing",
        summary: &output.summary,
        incidence_histogram: incidence_histogram(&output.batch.rays),
        sdr_histogram: sdr_histogram(&output.batch.rays),
        beam_value: output.envelope.as_ref().map(|e| e.beam_value),
        correction: &output.correction,
    };
    let json = serde_json::to_string_pretty(&doc).context("JSON serialisation error")?;
    std::fs::write(path, json).with_context(|| format!("Cannot write {}", path.display()))?;
    println!("Summary (JSON) written to: {}", path.display());
    Ok(())
}

/// Parse a `time_s,temperature_c` CSV. Blank lines and `#` comments are
/// skipped, as is a non-numeric header row.
pub fn parse_temperature_csv(content: &str) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut times = Vec::new();
    let mut temps = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 2 {
            anyhow::bail!("Line {}: expected 'time_s,temperature_c'", n + 1);
        }
        match (fields[0].parse::<f64>(), fields[1].parse::<f64>()) {
            (Ok(t), Ok(temp)) => {
                times.push(t);
                temps.push(temp);
            }
            _ if times.is_empty() => continue,
            _ => anyhow::bail!("Line {}: cannot parse '{}'", n + 1, line),
        }
    }
    Ok((times, temps))
}

/// CEM43 dose for a single-voxel time/temperature trace.
pub fn dose_from_csv(path: &Path) -> Result<f64> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let (times, temps) = parse_temperature_csv(&content)?;
    let series = ThermometrySeries::single_voxel(times, &temps).context("Invalid thermometry series")?;
    Ok(compute_thermal_dose(&series)[(0, 0, 0)])
}

/// Create a compute backend from the configured name.
///
/// - `"serial"`: calling thread only.
/// - `"cpu"`: Rayon thread pool.
pub fn create_backend(name: &str, threads: Option<usize>) -> Result<Arc<dyn ComputeBackend>> {
    match name {
        "serial" => Ok(Arc::new(SerialBackend::new())),
        "cpu" => {
            #[cfg(feature = "cpu")]
            {
                let backend = match threads {
                    Some(n) => calvaria_compute::CpuBackend::with_threads(n)?,
                    None => calvaria_compute::CpuBackend::new(),
                };
                println!("Backend: {}", backend.device_info().name);
                Ok(Arc::new(backend))
            }
            #[cfg(not(feature = "cpu"))]
            {
                let _ = threads;
                anyhow::bail!("CPU backend requested but binary was built without --features cpu")
            }
        }
        other => anyhow::bail!("Unknown compute backend '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    const JOB: &str = r#"
[volume]
dims = [61, 61, 61]

[[volume.layer]]
hu = 1500.0
shape = { type = "spherical_shell", centre = [0.0, 0.0, 0.0], outer_radius = 22.0, thickness = 4.0 }

[transducer]
radius_mm = 28.0
elements = 16
aperture_deg = 80.0

[envelope]
mode = "slice"
slice_half_extent_mm = 3.0
slice_points = 7
"#;

    #[test]
    fn test_run_and_write_outputs() {
        let job = parse_config(JOB).unwrap();
        let output = run_plan(&job).unwrap();
        assert_eq!(output.batch.rays.len(), 16);
        assert!(output.summary.active_count > 0);
        assert_eq!(output.envelope.as_ref().unwrap().dims, [7, 7, 1]);

        let dir = tempfile::tempdir().unwrap();
        write_outputs(&output, &job, dir.path()).unwrap();
        for name in ["skull_measures.tsv", "phases.act", "beam_paths.txt", "envelope.csv", "summary.json"] {
            assert!(dir.path().join(name).exists(), "missing {}", name);
        }
        let act = std::fs::read_to_string(dir.path().join("phases.act")).unwrap();
        assert_eq!(act.lines().next(), Some("16"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("summary.json")).unwrap()).unwrap();
        assert_eq!(json["summary"]["element_count"], 16);
    }

    #[test]
    fn test_temperature_csv() {
        let (t, temp) = parse_temperature_csv("time_s,temperature_c\n0,43\n30,43\n\n# done\n60,43\n").unwrap();
        assert_eq!(t, vec![0.0, 30.0, 60.0]);
        assert_eq!(temp.len(), 3);
        assert!(parse_temperature_csv("0,43\nabc,def\n").is_err());
    }

    #[test]
    fn test_unknown_backend() {
        assert!(create_backend("gpu", None).is_err());
        assert_eq!(
            create_backend("serial", None).unwrap().device_info().backend_type,
            calvaria_compute::BackendType::Serial
        );
    }
}
