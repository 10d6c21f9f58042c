//! `convoy validate`

use anyhow::Result;
use convoy_core::validate_group;
use convoy_resources::PortAllocator;
use tracing::debug;

use crate::cli::ValidateArgs;
use crate::manifest;

pub fn execute(args: &ValidateArgs) -> Result<()> {
    let group = manifest::load(args.manifest.as_deref())?;
    debug!(group = %group.name, containers = group.containers.len(), "Manifest parsed");

    validate_group(&group)?;
    PortAllocator::check(&group)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&group)?);
    } else {
        println!(
            "✅ Group {} is valid: {} container(s), {} volume(s), {} port(s)",
            group.name,
            group.containers.len(),
            group.volumes.len(),
            group.port_mappings().count()
        );
    }
    Ok(())
}
