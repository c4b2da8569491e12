use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};

use speciation::config::Config;
use speciation::io::{read_dataset, write_series};
use speciation::pipeline::train;

/// Recover [Br2] and [NaBr3] time series from UV-Vis kinetics exports
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TOML run configuration
    #[arg(short, long, default_value = "speciation.toml")]
    config: PathBuf,
}

fn run(cli: &Cli) -> speciation::Result<()> {
    let config = Config::from_file(&cli.config)?;
    let reference = read_dataset(&config.data.reference, config.data.skip_rows)?;
    let calibration = read_dataset(&config.data.calibration, config.data.skip_rows)?;

    let model = train(&reference, &calibration, &config)?;

    for run in &config.data.runs {
        let dataset = read_dataset(&run.input, config.data.skip_rows)?;
        let prediction = model.predict(&dataset, &config);
        for failure in &prediction.failures {
            warn!(
                "`{}` spectrum {} (t = {}) skipped: {}",
                dataset.name(),
                failure.index,
                failure.time,
                failure.error
            );
        }
        write_series(&run.output, &prediction.series)?;
        info!(
            "wrote {} points to {}",
            prediction.series.len(),
            run.output.display()
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
