use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::prelude::*;

/// Crates whose events follow the configured level
const OWN_TARGETS: [&str; 2] = ["vdt_rpc", "vdt_app"];

/// Build the target filter: `level` for our crates, warnings for the rest
pub fn filter(level: &str) -> anyhow::Result<Targets> {
    let level: LevelFilter = level.parse()?;
    Ok(OWN_TARGETS
        .iter()
        .fold(Targets::new().with_default(LevelFilter::WARN), |targets, target| {
            targets.with_target(*target, level)
        }))
}

/// Install the global subscriber. Calling it twice is an error.
pub fn init(level: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(filter(level)?)
        .try_init()?;
    Ok(())
}
