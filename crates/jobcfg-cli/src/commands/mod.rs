//! CLI command implementations.

pub mod resolve;

use anyhow::{Context, Result};
use jobcfg_config::JobConfigReader;
use jobcfg_core::ResolvedJob;
use tracing::debug;

/// Read, resolve and snapshot the declaration at `path`.
pub fn load(path: &str) -> Result<ResolvedJob> {
    debug!(path = %path, "Resolving job declaration");
    let doc = JobConfigReader::from_process_env()
        .read_from_file(path)
        .with_context(|| format!("failed to resolve job declaration '{}'", path))?;
    doc.to_resolved()
        .with_context(|| format!("job declaration '{}' left fields unresolved", path))
}

pub fn validate(path: &str) -> Result<()> {
    match load(path) {
        Ok(job) => {
            println!(
                "Configuration is valid ({} run{})",
                job.runs.len(),
                if job.runs.len() == 1 { "" } else { "s" }
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}
