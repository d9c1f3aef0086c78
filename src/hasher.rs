//! Composite per-level image digests.
//!
//! Folds every level-included entry of an archive into a single running hash
//! context, in archive order. The result is a quick identity check for one
//! image at one level — and it is **order-sensitive**: two images whose guts
//! are set-equal can still produce different composite digests if their
//! archives are ordered differently. Callers wanting order-independent
//! comparison must use the diff engine instead.

use std::collections::BTreeMap;
use std::io::Read;

use crate::error::Result;
use crate::levels::{get_levels, Level};
use crate::notifier::Notifier;
use crate::sources::ImageSource;

/// Digest of one image under one level, hex-encoded.
///
/// The same inclusion and content-vs-raw policy as guts extraction applies;
/// the entries are mixed into one context in stream order.
pub fn image_digest(
    image: &str,
    stream: Box<dyn Read>,
    level: &Level,
    source: &dyn ImageSource,
    notifier: &Notifier,
) -> Result<String> {
    let walker = crate::archive::ArchiveWalker::new(stream)?;
    let mut context = md5::Context::new();

    walker.for_each(|entry| {
        if entry.is_dir || entry.is_symlink {
            return Ok(());
        }
        if level.wants_content(&entry.path) {
            let content = source.read_file_content(image, &entry.path)?;
            context.consume(content.as_deref().unwrap_or_default());
        } else if level.includes(&entry.path) {
            context.consume(&entry.raw);
        }
        Ok(())
    })?;

    let digest = format!("{:x}", context.compute());
    notifier.debug(&format!("{}: {} digest {}", image, level.name, digest));
    Ok(digest)
}

/// Composite digest for every registered level of a schema version.
///
/// Archive streams are single-pass, so each level re-exports a fresh one
/// (content-assessed entries must be re-read anyway).
pub fn image_digests_all_levels(
    image: &str,
    source: &dyn ImageSource,
    version: &str,
    notifier: &Notifier,
) -> Result<BTreeMap<String, String>> {
    let levels = get_levels(version)?;
    let mut digests = BTreeMap::new();

    for (name, level) in &levels {
        let stream = source.export(image)?;
        let digest = image_digest(image, stream, level, source, notifier)?;
        digests.insert(name.clone(), digest);
    }

    Ok(digests)
}
