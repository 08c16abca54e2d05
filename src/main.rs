//! GaganFusion command line entry point.
//!
//! ```bash
//! gagan-fusion INPUT_FILE OUTPUT_FILE RESERVED ERROR_MODEL [--config FILE]
//! ```
//!
//! `RESERVED` is accepted and ignored to stay invocation-compatible with
//! existing tooling. The error model token selects both the kernel and the
//! self-tuning mode (see [`gagan_fusion::ErrorModelConfig`]).

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;

use gagan_fusion::{
    app, clock_drift_noise_for, file_io, ErrorModelConfig, FusionConfig, POSITION_STATE,
};

#[derive(Parser)]
#[command(name = "gagan-fusion")]
#[command(about = "Robust GNSS pseudorange + wheel odometry fusion")]
struct Args {
    /// Input sensor file (whitespace-separated records)
    input_file: String,

    /// Output trajectory file
    output_file: String,

    /// Reserved argument; accepted and ignored
    #[allow(dead_code)]
    reserved: String,

    /// Error model: gauss, dcs, cdce, sm, mm, stsm, stmm, stsm_vbi, stmm_vbi
    error_model: String,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} - {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let args = Args::parse();

    let model = match ErrorModelConfig::from_token(&args.error_model) {
        Ok(model) => model,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match &args.config {
        Some(path) => match FusionConfig::load(path) {
            Ok(config) => {
                log::info!("loaded config from {path}");
                config
            }
            Err(e) => {
                log::error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => FusionConfig::default(),
    };

    log::info!("gagan-fusion starting");
    log::info!("  input:  {}", args.input_file);
    log::info!("  output: {}", args.output_file);
    log::info!("  model:  {}", args.error_model);

    if let Err(e) = run(&args, model, &config) {
        log::error!("fusion failed: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(args: &Args, model: ErrorModelConfig, config: &FusionConfig) -> gagan_fusion::Result<()> {
    let measurements = file_io::read_sensor_file(&args.input_file)?;
    let clock_drift_std = clock_drift_noise_for(&args.input_file);

    let results = app::run(&measurements, model, config, clock_drift_std)?;

    file_io::write_position_file(&args.output_file, &results, POSITION_STATE)?;
    log::info!("wrote trajectory to {}", args.output_file);
    Ok(())
}
