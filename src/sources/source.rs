use anyhow::Result;
use std::io::Read;

/// Boundary to the external runtime that materializes image filesystems.
///
/// The engine never talks to a container runtime directly; everything it
/// needs from one is behind this trait.
pub trait ImageSource {
    /// Returns the name of the source for identification purposes
    fn name(&self) -> &str;

    /// Produces a fresh archive byte stream of the image's full filesystem.
    ///
    /// Streams are single-pass and not seekable; every independent walk must
    /// call this again. The stream may be plain or gzipped tar — the walker
    /// sniffs for itself.
    fn export(&self, image: &str) -> Result<Box<dyn Read>>;

    /// Decoded content of one normalized path inside the image.
    ///
    /// Returns `Ok(None)` when the path is unreadable: permission-restricted,
    /// a symlink, missing, or zero-length. Callers treat that as a soft
    /// failure and fall back to coarser comparison, never as an error.
    fn read_file_content(&self, image: &str, path: &str) -> Result<Option<Vec<u8>>>;
}
