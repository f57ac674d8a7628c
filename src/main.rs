use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use ppg_conditioner::config::{Args, Command};
use ppg_conditioner::data_loading::{read_csv_file, read_feather_file, read_raw_dir, FrameEvent};
use ppg_conditioner::output::{write_frame_json, write_windows_to_csv, WindowSummary};
use ppg_conditioner::{process_frame, validate_window, PipelineConfig, ScalerStore};
use std::path::Path;

fn read_json_values(path: &Path) -> Result<Vec<f32>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("{} should hold a JSON array of numbers", path.display()))
}

fn load_events(input_path: &Path, csv_input: bool, feather_input: bool) -> Result<Vec<FrameEvent>> {
    match (csv_input, feather_input) {
        (true, true) => bail!("--csv-input and --feather-input are mutually exclusive"),
        (true, false) => read_csv_file(input_path),
        (false, true) => read_feather_file(input_path),
        (false, false) => read_raw_dir(input_path),
    }
}

fn run_frames(
    config: &PipelineConfig,
    events: &[FrameEvent],
    output: Option<&str>,
    force_valid: bool,
) -> Result<()> {
    let mut rows = Vec::new();
    let mut frames_done = 0;
    let mut skipped = 0;

    for event in events {
        let frame = match process_frame(&event.red, &event.ir, config) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping seq {}: {}", event.seq, e);
                skipped += 1;
                continue;
            }
        };

        let validations = frame
            .windows()
            .iter()
            .map(|window| validate_window(window, config, force_valid))
            .collect::<ppg_conditioner::Result<Vec<_>>>()
            .with_context(|| format!("Failed to validate windows of seq {}", event.seq))?;

        debug!(
            "seq {}: {}/{} windows valid",
            event.seq,
            validations.iter().filter(|v| v.is_valid()).count(),
            validations.len()
        );

        if let Some(prefix) = output {
            write_frame_json(prefix, event, &frame, &validations)?;
        }
        rows.extend(
            validations
                .iter()
                .enumerate()
                .map(|(i, result)| WindowSummary::new(event, i, result)),
        );
        frames_done += 1;
    }

    if let Some(prefix) = output {
        let path = write_windows_to_csv(prefix, &rows)?;
        info!("Window summary written to {}", path.display());
    }

    let valid = rows.iter().filter(|r| r.status == ppg_conditioner::Status::Valid).count();
    println!("Processed {} frames ({} skipped)", frames_done, skipped);
    println!("  Windows: {}", rows.len());
    if !rows.is_empty() {
        println!(
            "  Valid:   {} ({:.1}%)",
            valid,
            100.0 * valid as f32 / rows.len() as f32
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(scaler) = args.scaler {
        config.scaler_path = scaler;
    }

    match args.command {
        Command::Frames {
            input_path,
            csv_input,
            feather_input,
            variant,
            channel,
            output,
            force_valid,
        } => {
            if let Some(variant) = variant {
                config.variant = variant;
            }
            if let Some(channel) = channel {
                config.model_channel = channel;
            }
            config.validate()?;
            if force_valid {
                warn!("--force-valid marks every window valid; use for debugging only");
            }

            let events = load_events(&input_path, csv_input, feather_input)?;
            info!("Loaded {} frame events from {}", events.len(), input_path.display());
            run_frames(&config, &events, output.as_deref(), force_valid)?;
        }
        Command::Validate {
            window,
            force_valid,
        } => {
            let samples = read_json_values(&window)?;
            let result = validate_window(&samples, &config, force_valid)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Rescale { values, channel } => {
            let scaled = read_json_values(&values)?;
            let store = ScalerStore::load_cached(&config.scaler_path)?;
            let restored = store.unscale_channel(&channel, &scaled)?;
            println!("{}", serde_json::to_string(&restored)?);
        }
    }

    Ok(())
}
