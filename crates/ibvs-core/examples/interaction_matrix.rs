//! Compute the interaction matrix of one feature and write a JSON report.
//!
//! Usage: `interaction_matrix <x> <y> <z> [config.json] [report.json]`

use std::{env, path::PathBuf};

use ibvs_core::{FeatureObservation, IbvsConfig, InteractionReport};
use log::LevelFilter;

#[cfg(not(feature = "tracing"))]
use log::{info, warn};

#[cfg(feature = "tracing")]
use tracing::{info, warn};

#[cfg(feature = "tracing")]
use ibvs_core::init_tracing;
#[cfg(not(feature = "tracing"))]
use ibvs_core::init_with_level;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 3 {
        eprintln!("Usage: interaction_matrix <x> <y> <z> [config.json] [report.json]");
        return Ok(());
    }

    // Verbose until the config says otherwise, so its loading is logged.
    #[cfg(not(feature = "tracing"))]
    init_with_level(LevelFilter::Debug)?;
    #[cfg(feature = "tracing")]
    init_tracing(false, LevelFilter::Debug);

    let feature = FeatureObservation::new(args[0].parse()?, args[1].parse()?, args[2].parse()?);
    let cfg = match args.get(3) {
        Some(path) => IbvsConfig::load_json(path)?,
        None => IbvsConfig::default(),
    };
    let report_path = args
        .get(4)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("interaction_report.json"));

    // The subscriber filter is fixed once installed; only the stderr
    // logger follows `log_level` from the config.
    #[cfg(not(feature = "tracing"))]
    init_with_level(cfg.log_level())?;

    let calc = cfg.build_calculator()?;
    let k = calc.intrinsics();
    info!(
        "camera fx={:.3} fy={:.3} cx={:.3} cy={:.3}",
        k.fx, k.fy, k.cx, k.cy
    );

    let mut report = InteractionReport::new(*k, feature);
    match calc.compute_observation(&feature) {
        Ok(l) => {
            for row in l.to_rows() {
                info!("{row:.4?}");
            }
            report.set_matrix(&l);
        }
        Err(err) => {
            warn!("interaction matrix rejected: {err}");
            report.set_error(err);
        }
    }

    report.write_json(&report_path)?;
    info!("wrote report to {}", report_path.display());
    Ok(())
}
