//! Calvaria command-line interface.
//!
//! Plan transcranial sonications from TOML job files:
//! ```sh
//! calvaria run job.toml
//! calvaria validate job.toml
//! calvaria channel job.toml 12
//! calvaria dose thermometry.csv
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "calvaria")]
#[command(about = "Calvaria: transcranial focused ultrasound planning")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a job and write the skull measures, ACT file and reports.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file without planning.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// Print the ray detail for one transducer channel.
    Channel {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Zero-based element index.
        index: usize,
    },
    /// Accumulate CEM43 dose from a `time_s,temperature_c` CSV.
    Dose {
        /// Path to the thermometry CSV.
        csv: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output } => {
            println!("Calvaria Planner");
            println!("================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let result = runner::run_plan(&job)?;
            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));
            runner::write_outputs(&result, &job, &out_dir)?;

            println!("Planning complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            let geometry = runner::build_geometry(&job)?;
            println!("Configuration is valid.");
            println!(
                "  Volume: {}x{}x{} voxels at {:?} mm",
                job.volume.dims[0], job.volume.dims[1], job.volume.dims[2], job.volume.spacing
            );
            println!("  Phantom layers: {}", job.volume.layers.len());
            println!("  Elements: {}", geometry.element_count());
            println!("  Frequency: {:.0} kHz", job.params.frequency_hz / 1e3);
            println!("  Bone speed: {:.0} m/s", job.params.bone_speeds.bone_speed);
            println!("  Compute backend: {}", job.compute.backend);
            println!("  Envelope: {}", if job.envelope.enabled { job.envelope.mode.as_str() } else { "disabled" });
            Ok(())
        }
        Commands::Channel { config, index } => {
            let job = config::load_config(&config)?;
            let volume = runner::build_volume(&job)?;
            let mut session = runner::build_session(&job)?;
            session.recompute(Some(&volume))?;
            let detail = session.channel_detail(index)?;

            println!("Channel {}", detail.element);
            println!("  Status:            {:?}", detail.status);
            println!("  Active:            {}", detail.active);
            println!(
                "  Incidence angle:   {:.2} deg{}",
                detail.incidence_angle_deg,
                if detail.poor_incidence { " (poor)" } else { "" }
            );
            println!("  SDR:               {:.3} (neighbourhood {:.3})", detail.sdr, detail.sdr_avg);
            println!(
                "  Skull thickness:   {:.2} mm (normalised {:.2} mm)",
                detail.skull_thickness_mm, detail.normalized_thickness_mm
            );
            println!(
                "  Bone speed:        outer {:.0}, inner {:.0}, average {:.0} m/s",
                detail.outer_bone_speed, detail.inner_bone_speed, detail.avg_bone_speed
            );
            println!("  Travel time:       {:.3} us", detail.travel_time_s * 1e6);
            println!("  Phase:             {:.4} rad", detail.phase_rad);
            Ok(())
        }
        Commands::Dose { csv } => {
            let dose = runner::dose_from_csv(&csv)?;
            println!("CEM43 dose: {:.4} min", dose);
            Ok(())
        }
    }
}
