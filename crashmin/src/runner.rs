use std::path::PathBuf;

use anyhow::{Context, Result};
use common::{
    error::LogError,
    fs::{read_file, split_file_name, write_file},
};
use minimizer::{Crash, MinimizationEngine, MinimizationReport};
use serde::Serialize;

use crate::RunConfig;

#[derive(Debug, Serialize)]
pub struct Summary {
    pub crash_file: PathBuf,
    pub output_file: Option<PathBuf>,
    pub other_crash_files: Vec<PathBuf>,
    #[serde(flatten)]
    pub report: MinimizationReport,
}

pub fn run(config: RunConfig) -> Result<Summary> {
    let content = read_file(&config.crash_file)?;
    let seed = config
        .seed_file
        .as_deref()
        .map(read_file)
        .transpose()
        .context("Failed to read seed file")?;
    let name = match &config.seed_file {
        Some(seed_file) => split_file_name(seed_file).0,
        None => "string".into(),
    };

    let debugger = config.target.debugger();
    let output_file = config.minimizer.output.clone();
    let extension = config.minimizer.extension.clone();

    log::info!(
        "Minimizing {:?} towards {} ...",
        config.crash_file,
        config.minimizer.target
    );
    let mut engine = MinimizationEngine::new(
        config.minimizer,
        debugger,
        Crash {
            content,
            seed,
            name: Some(name.clone()),
        },
    )
    .context("Failed to create minimizer")?;
    let report = engine.run()?;
    drop(engine);

    if let Some(output_file) = &output_file {
        write_file(output_file, &report.content)
            .with_context(|| format!("Failed to write minimized file {output_file:?}"))?;
    }

    // other crashes are kept for the caller to verify
    let other_crash_files = report
        .other_crashes
        .iter()
        .filter_map(|(signature, crash)| {
            let path = config
                .output_dir
                .join(format!("{name}-{signature}{extension}"));
            write_file(&path, &crash.content).log_warn().map(|_| path)
        })
        .collect();

    let summary = Summary {
        crash_file: config.crash_file,
        output_file,
        other_crash_files,
        report,
    };
    print_summary(&summary, config.yaml)?;

    Ok(summary)
}

fn print_summary(summary: &Summary, yaml: bool) -> Result<()> {
    if yaml {
        let summary = serde_yaml::to_string(summary).context("Failed to serialize summary")?;
        println!("{summary}");
        return Ok(());
    }

    let report = &summary.report;
    log::info!("Minimization {}", report.termination);
    log::info!(
        "Hamming distance {} => {} ({} tries, {} misses, {} debugger runs, {:?})",
        report.start_distance,
        report.min_distance,
        report.total_tries,
        report.total_misses,
        report.debugger_runs,
        report.elapsed
    );
    log::info!("Bytemap: {:?}", report.bytemap);
    if let Some(output_file) = &summary.output_file {
        log::info!("Minimized file: {:?}", output_file);
    }
    for path in &summary.other_crash_files {
        log::info!("Other crash: {:?}", path);
    }

    Ok(())
}
