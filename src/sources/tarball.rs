use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use super::ImageSource;
use crate::archive::ArchiveWalker;

/// Tarball implementation of [`ImageSource`] for pre-exported images.
///
/// Maps image references to `.tar`/`.tar.gz` files on disk. `export` opens
/// the file fresh each call, so repeated walks work the same way they would
/// against a live runtime export.
#[derive(Debug, Default)]
pub struct TarballSource {
    archives: BTreeMap<String, PathBuf>,
}

impl TarballSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source backed by a single tarball.
    pub fn single(image: &str, tarball: impl Into<PathBuf>) -> Self {
        let mut source = Self::new();
        source.register(image, tarball);
        source
    }

    /// Registers a tarball for an image reference.
    pub fn register(&mut self, image: &str, tarball: impl Into<PathBuf>) {
        self.archives.insert(image.to_string(), tarball.into());
    }

    fn path_for(&self, image: &str) -> Result<&Path> {
        let path = self
            .archives
            .get(image)
            .ok_or_else(|| anyhow!("no tarball registered for image '{}'", image))?;
        if !path.is_file() {
            return Err(anyhow!("tarball does not exist: {}", path.display()));
        }
        Ok(path)
    }
}

impl ImageSource for TarballSource {
    fn name(&self) -> &str {
        "tarball"
    }

    fn export(&self, image: &str) -> Result<Box<dyn Read>> {
        let path = self.path_for(image)?;
        let file = File::open(path)
            .map_err(|e| anyhow!("failed to open tarball {}: {}", path.display(), e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn read_file_content(&self, image: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let walker = ArchiveWalker::new(self.export(image)?)?;

        let mut found: Option<Vec<u8>> = None;
        walker.for_each(|entry| {
            if found.is_none()
                && entry.path == path
                && !entry.is_dir
                && !entry.is_symlink
                && entry.size > 0
            {
                found = Some(entry.body().to_vec());
            }
            Ok(())
        })?;

        Ok(found)
    }
}
