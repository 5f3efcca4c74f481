//! Verify command - rehash committed layers

use crate::cache::VolumeCache;
use crate::cli::args::VerifyArgs;
use crate::config::Config;
use crate::error::{LifecycleError, LifecycleResult};
use console::style;
use tracing::debug;

/// Execute the verify command
pub fn execute(args: VerifyArgs, config: &Config) -> LifecycleResult<()> {
    let cache = VolumeCache::open(&args.dir)?.with_metadata_policy(config.cache.corrupt_metadata);
    let digests = cache.committed_layers()?;

    if digests.is_empty() {
        println!("No committed layers in {}", args.dir.display());
        return Ok(());
    }

    let mut failed = 0;
    for digest in &digests {
        debug!(layer = %digest, "Verifying layer");
        match cache.verify_layer(digest) {
            Ok(()) => println!("  {} {}", style("✓").green(), digest),
            Err(e) => {
                failed += 1;
                println!("  {} {}: {}", style("✗").red(), digest, e);
            }
        }
    }

    println!();
    if failed > 0 {
        return Err(LifecycleError::User(format!(
            "{failed} of {} layer(s) failed verification",
            digests.len()
        )));
    }

    println!("{} {} layer(s) verified", style("✓").green(), digests.len());
    Ok(())
}
