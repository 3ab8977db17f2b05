//! Console control surface for the XY stage.
//!
//! Connects both axes, homes them concurrently, then runs a line-oriented
//! prompt loop: a Y target, an X target (each range-validated before any
//! device call), a joint move, and a Y/N confirmation to return both axes
//! to 0 mm and exit. Both axes are explicitly disconnected on the way out.
//!
//! Run with `--mock` to drive simulated axes; real Thorlabs K-Cube hardware
//! requires building with `--features hardware_kinesis`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

use xy_stage::config::{AxisSettings, StageConfig};
use xy_stage::hardware::mock::MockAxis;
use xy_stage::hardware::{AxisId, MotionAxis};
use xy_stage::stage::StageController;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "xy-stage", about = "Dual-axis sample stage console control")]
struct Cli {
    /// Path to the configuration file (default: xystage.toml).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Drive simulated axes instead of hardware.
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => StageConfig::load_from(path)?,
        None => StageConfig::load()?,
    };
    init_tracing(&config.application.log_level);
    tracing::info!(name = %config.application.name, mock = cli.mock, "starting");

    let (x_driver, y_driver) = build_drivers(&cli, &config)?;
    let stage = StageController::from_config(&config, x_driver, y_driver);
    stage.connect().await?;

    println!("Homing both axes...");
    if let Err(err) = stage.home_both(config.joint_home_timeout()).await {
        stage.disconnect().await;
        return Err(err.into());
    }

    let result = prompt_loop(&stage, &config).await;
    stage.disconnect().await;
    println!("Both stages disconnected. Done.");
    result
}

fn init_tracing(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_drivers(
    cli: &Cli,
    config: &StageConfig,
) -> Result<(Box<dyn MotionAxis>, Box<dyn MotionAxis>)> {
    if cli.mock {
        // Slow enough that joint motion is visibly concurrent in the log.
        let delay = Duration::from_millis(300);
        return Ok((
            Box::new(MockAxis::with_motion_delay(delay)),
            Box::new(MockAxis::with_motion_delay(delay)),
        ));
    }

    #[cfg(feature = "hardware_kinesis")]
    {
        use xy_stage::hardware::kinesis::KinesisAxis;
        return Ok((
            Box::new(KinesisAxis::open(&config.x)?) as Box<dyn MotionAxis>,
            Box::new(KinesisAxis::open(&config.y)?) as Box<dyn MotionAxis>,
        ));
    }

    #[cfg(not(feature = "hardware_kinesis"))]
    {
        let _ = config;
        anyhow::bail!(
            "built without Kinesis support; run with --mock or rebuild with --features hardware_kinesis"
        )
    }
}

async fn prompt_loop(stage: &StageController, config: &StageConfig) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let Some(y_text) = prompt(&mut lines, &target_prompt(AxisId::Y, &config.y)).await? else {
            break;
        };
        let target_y = match parse_target(&y_text, AxisId::Y, &config.y) {
            Ok(value) => value,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        let Some(x_text) = prompt(&mut lines, &target_prompt(AxisId::X, &config.x)).await? else {
            break;
        };
        let target_x = match parse_target(&x_text, AxisId::X, &config.x) {
            Ok(value) => value,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        // Caller contract: the whole request is rejected before dispatch if
        // either target is out of range.
        if let Err(err) = stage.validate_targets(target_x, target_y) {
            println!("{err}");
            continue;
        }

        println!("Moving to X={target_x:.2} mm, Y={target_y:.2} mm...");
        match stage
            .move_both(target_x, target_y, config.joint_move_timeout())
            .await
        {
            Ok(()) => println!("Move complete."),
            Err(err) => println!("Move failed: {err}"),
        }

        let Some(choice) = prompt(&mut lines, "Return both axes to 0 mm (Y/N)? ").await? else {
            break;
        };
        match choice.trim().to_uppercase().as_str() {
            "Y" => {
                println!("Homing both axes back to 0.0 mm...");
                if let Err(err) = stage.home_both(config.joint_home_timeout()).await {
                    println!("Homing failed: {err}");
                }
                break;
            }
            "N" => continue,
            _ => {
                println!("Invalid input. Assuming 'N'.");
                continue;
            }
        }
    }

    Ok(())
}

fn target_prompt(axis: AxisId, settings: &AxisSettings) -> String {
    format!(
        "Enter {axis} target ({} to {} mm): ",
        settings.range_min_mm, settings.range_max_mm
    )
}

/// Parse and range-validate one axis target. Invalid input produces a
/// message for the user and never reaches a device.
fn parse_target(text: &str, axis: AxisId, settings: &AxisSettings) -> Result<f64, String> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| "Invalid input. Please enter a number.".to_string())?;
    if !settings.contains(value) {
        return Err(format!(
            "{axis} value out of range ({} to {} mm).",
            settings.range_min_mm, settings.range_max_mm
        ));
    }
    Ok(value)
}

/// Print a prompt and read one line; `None` on end of input.
async fn prompt(lines: &mut Lines<BufReader<Stdin>>, text: &str) -> Result<Option<String>> {
    use std::io::Write;
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?)
}
