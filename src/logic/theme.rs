//! Locating an installed bootloader theme.
//!
//! Theme install routines lay their files out however they like, so the
//! descriptor is found by name anywhere under the theme directory. The walk
//! visits siblings in file-name order, which makes the choice between several
//! descriptors the same on every run.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::context::{in_target_path, target_path};

/// A resolved theme descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeDescriptor {
    /// Where the file is on the host (under the target mount)
    pub host_path: PathBuf,
    /// The same file as the installed system sees it; what `GRUB_THEME` gets
    pub target_path: PathBuf,
}

/// Recursive filename search for theme descriptors.
#[derive(Debug, Clone)]
pub struct ThemeResolver {
    marker: String,
}

impl ThemeResolver {
    /// Search for files named `marker` (usually `theme.txt`)
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Every descriptor under `search_root`, in traversal order.
    ///
    /// A missing or unreadable search root yields no candidates.
    pub fn candidates(&self, search_root: &Path) -> Vec<PathBuf> {
        WalkDir::new(search_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry during theme search: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == self.marker.as_str())
            .map(|entry| entry.into_path())
            .collect()
    }

    /// First descriptor under `search_root`, logging the choice and the
    /// candidates passed over.
    pub fn resolve(&self, search_root: &Path) -> Option<PathBuf> {
        let mut candidates = self.candidates(search_root).into_iter();
        let chosen = candidates.next()?;
        let others: Vec<PathBuf> = candidates.collect();

        info!("Theme descriptor: {}", chosen.display());
        if !others.is_empty() {
            warn!(
                "{} other {} candidates ignored: {}",
                others.len(),
                self.marker,
                others
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Some(chosen)
    }

    /// Resolve inside a target mounted at `root`. `theme_dir` is the
    /// in-target directory (`/boot/grub/themes`).
    pub fn resolve_in_target(&self, root: &Path, theme_dir: &Path) -> Option<ThemeDescriptor> {
        let host_path = self.resolve(&target_path(root, theme_dir))?;
        let target_path = in_target_path(root, &host_path)?;
        Some(ThemeDescriptor {
            host_path,
            target_path,
        })
    }
}
