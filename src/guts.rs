//! Fingerprint ("guts") extraction: one image under one level.
//!
//! A [`Guts`] holds three parallel maps keyed by normalized path — content
//! digest, byte size, and root-ownership flag. It is built in a single
//! streaming pass over an exported archive and is never mutated afterwards.
//!
//! Hashing policy per entry:
//! - directories and symlinks are skipped unconditionally;
//! - paths in the level's `assess_content` set are hashed on *decoded file
//!   content* (fetched through the [`ImageSource`]), so volatile metadata
//!   such as timestamps does not perturb the digest;
//! - all other included paths are hashed on the raw archive bytes (header
//!   block plus body), which deliberately captures metadata sensitivity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

use crate::archive::ArchiveWalker;
use crate::error::Result;
use crate::levels::Level;
use crate::notifier::Notifier;
use crate::sources::ImageSource;

/// 128-bit identity digest, hex-encoded. This is a content fingerprint for
/// dedup and comparison, not a security primitive.
pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

#[derive(Debug, Clone, Copy)]
pub struct GutsOptions {
    /// Record a root-ownership flag per included path.
    pub tag_root: bool,
    /// Record a byte size per included path.
    pub include_sizes: bool,
}

impl Default for GutsOptions {
    fn default() -> Self {
        Self {
            tag_root: true,
            include_sizes: true,
        }
    }
}

/// The fingerprint of one image under one level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guts {
    pub image: String,
    pub level: String,
    pub hashes: BTreeMap<String, String>,
    pub sizes: BTreeMap<String, u64>,
    pub root_owned: BTreeMap<String, bool>,
}

impl Guts {
    fn new(image: &str, level: &str) -> Self {
        Self {
            image: image.to_string(),
            level: level.to_string(),
            hashes: BTreeMap::new(),
            sizes: BTreeMap::new(),
            root_owned: BTreeMap::new(),
        }
    }

    /// Number of fingerprinted paths.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Iterator over fingerprinted paths, in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.hashes.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Builds the [`Guts`] of `image` under `level` from a fresh archive stream.
///
/// Entries excluded by the level are absent from all three maps. Content
/// assessment that finds the file unreadable hashes the empty byte string,
/// mirroring the diff engine's soft-failure policy for unreadable content.
pub fn extract_guts(
    image: &str,
    stream: Box<dyn Read>,
    level: &Level,
    options: &GutsOptions,
    source: &dyn ImageSource,
    notifier: &Notifier,
) -> Result<Guts> {
    let walker = ArchiveWalker::new(stream)?;
    let mut guts = Guts::new(image, &level.name);
    let mut seen: u64 = 0;

    walker.for_each(|entry| {
        seen += 1;
        if entry.is_dir || entry.is_symlink {
            return Ok(());
        }

        let digest = if level.wants_content(&entry.path) {
            let content = source.read_file_content(image, &entry.path)?;
            hex_digest(content.as_deref().unwrap_or_default())
        } else if level.includes(&entry.path) {
            hex_digest(&entry.raw)
        } else {
            return Ok(());
        };

        if options.include_sizes {
            guts.sizes.insert(entry.path.clone(), entry.size);
        }
        if options.tag_root {
            guts.root_owned.insert(entry.path.clone(), entry.root_owned());
        }
        guts.hashes.insert(entry.path.clone(), digest);
        Ok(())
    })?;

    notifier.debug(&format!(
        "{}: fingerprinted {} of {} entries at level {}",
        image,
        guts.len(),
        seen,
        level.name
    ));
    Ok(guts)
}
