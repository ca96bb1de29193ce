//! Directory-scan discovery.
//!
//! A plugin is a subdirectory of the root holding a `contract.v1.json`,
//! optionally next to a `plugin.json`. Directories are visited in sorted
//! order so repeated scans of an unchanged tree produce identical registries.

use crate::capability::EntryPoints;
use crate::error::DiscoveryError;
use crate::manifest::PluginManifest;
use crate::registry::{CapabilityRecord, Registry, RegistryBuilder};
use std::path::{Path, PathBuf};
use toolbox_core::{CONTRACT_FILE, Contract};

/// Scan `root` and bind entry points from `entry_points`
///
/// Entry points missing from the table are not an error here; invoking such
/// a capability reports `dependency_error`.
///
/// # Errors
///
/// Returns error if the root is unreadable, a contract or manifest is
/// malformed, or two plugins declare the same name
pub fn discover(root: &Path, entry_points: &EntryPoints) -> Result<Registry, DiscoveryError> {
    discover_into(Registry::builder(), root, entry_points)
}

/// Scan `root` into an existing builder
///
/// # Errors
///
/// Same as [`discover`]
pub fn discover_into(
    mut builder: RegistryBuilder,
    root: &Path,
    entry_points: &EntryPoints,
) -> Result<Registry, DiscoveryError> {
    let dirs = plugin_dirs(root)?;
    tracing::debug!(root = %root.display(), candidates = dirs.len(), "scanning capabilities");

    for dir in dirs {
        let record = load_plugin(&builder, &dir, entry_points)?;
        builder.insert(record)?;
    }

    let registry = builder.build();
    tracing::info!(
        root = %root.display(),
        capabilities = registry.len(),
        "capabilities discovered"
    );
    Ok(registry)
}

/// Sorted plugin directories under `root`
///
/// # Errors
///
/// Returns error if `root` cannot be listed
pub fn plugin_dirs(root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let unreadable = |e: std::io::Error| DiscoveryError::RootUnreadable {
        path: root.to_path_buf(),
        reason: e.to_string(),
    };

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if !path.is_dir() {
            continue;
        }
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(|n| n.starts_with('.') || n.starts_with('_'));
        if hidden {
            continue;
        }
        if !path.join(CONTRACT_FILE).is_file() {
            tracing::trace!(dir = %path.display(), "skipping directory without contract");
            continue;
        }
        dirs.push(path);
    }
    dirs.sort();
    Ok(dirs)
}

fn load_plugin(
    builder: &RegistryBuilder,
    dir: &Path,
    entry_points: &EntryPoints,
) -> Result<CapabilityRecord, DiscoveryError> {
    let contract = Contract::from_path(&dir.join(CONTRACT_FILE))
        .map_err(|e| DiscoveryError::contract(dir, &e))?;
    let compiled =
        builder
            .validator()
            .validate(&contract)
            .map_err(|e| DiscoveryError::InvalidContract {
                dir: dir.to_path_buf(),
                reason: e.to_string(),
            })?;

    let manifest = PluginManifest::load(dir).map_err(|reason| DiscoveryError::InvalidManifest {
        dir: dir.to_path_buf(),
        reason,
    })?;

    let name = contract.name.to_string();
    let (entry_point, surfaces) = match &manifest {
        Some(manifest) => {
            if manifest.capability_id != name {
                return Err(DiscoveryError::InvalidManifest {
                    dir: dir.to_path_buf(),
                    reason: format!(
                        "capability_id '{}' does not match contract name '{name}'",
                        manifest.capability_id
                    ),
                });
            }
            (
                manifest.entry_point_or(&name).to_string(),
                manifest.surfaces_or_all(),
            )
        }
        None => (name.clone(), crate::manifest::Surface::all()),
    };

    let factory = entry_points.get(&entry_point).cloned();
    if factory.is_none() {
        tracing::debug!(capability = %name, entry_point = %entry_point, "entry point not in table");
    }

    Ok(CapabilityRecord::new(contract, compiled, entry_point, factory)
        .with_dir(dir.to_path_buf())
        .with_surfaces(surfaces))
}
