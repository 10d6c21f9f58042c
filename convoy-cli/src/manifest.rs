//! Manifest loading

use anyhow::{Context, Result};
use convoy_core::{Group, Manifest};
use std::io::Read;
use std::path::Path;

/// Read a manifest from a file, or from stdin when the path is absent or `-`
pub fn load(path: Option<&Path>) -> Result<Group> {
    let text = match path {
        Some(p) if p != Path::new("-") => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read manifest {}", p.display()))?,
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read manifest from stdin")?;
            text
        }
    };

    let group = Manifest::from_yaml(&text)?.into_group()?;
    Ok(group)
}
