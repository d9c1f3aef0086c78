//! Streaming traversal of an exported image filesystem archive.
//!
//! [`ArchiveWalker`] consumes an opaque byte stream (plain or gzipped tar, as
//! produced by a runtime's export facility) and visits [`ArchiveEntry`]
//! values in original stream order, holding one entry in memory at a time.
//! Streams are single-pass: a walker is consumed by the walk, and callers
//! needing another pass must export a fresh stream.

use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use tar_rs as tar;

use crate::error::{Error, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Size of a tar header block; an entry's raw bytes are the header block
/// followed by the unpadded body.
pub const HEADER_LEN: usize = 512;

/// Normalizes a raw archive path: a single leading `./` (or a bare `.`) is
/// stripped exactly once and any trailing slash is trimmed. Idempotent.
pub fn normalize_path(raw: &str) -> String {
    let stripped = raw.strip_prefix("./").unwrap_or(raw);
    let stripped = if stripped == "." { "" } else { stripped };
    stripped.trim_end_matches('/').to_string()
}

/// One filesystem node as read from the archive stream.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Normalized path; empty for the archive root.
    pub path: String,
    /// Raw header block followed by the body bytes.
    pub raw: Vec<u8>,
    pub size: u64,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub uid: u64,
    pub gid: u64,
    pub uname: Option<String>,
    pub gname: Option<String>,
}

impl ArchiveEntry {
    /// Body bytes, without the header block.
    pub fn body(&self) -> &[u8] {
        &self.raw[HEADER_LEN.min(self.raw.len())..]
    }

    pub fn root_owned(&self) -> bool {
        self.uid == 0
            || self.gid == 0
            || self.uname.as_deref() == Some("root")
            || self.gname.as_deref() == Some("root")
    }
}

pub struct ArchiveWalker {
    archive: tar::Archive<Box<dyn Read>>,
}

impl ArchiveWalker {
    /// Wraps a byte stream, sniffing the gzip magic bytes to decide whether
    /// decompression is needed.
    pub fn new(mut stream: Box<dyn Read>) -> Result<Self> {
        let mut magic = [0u8; 2];
        let mut read = 0;
        while read < magic.len() {
            match stream.read(&mut magic[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::corrupt("cannot read archive stream", e)),
            }
        }

        // Put the sniffed bytes back in front of the stream
        let rewound: Box<dyn Read> = Box::new(Cursor::new(magic[..read].to_vec()).chain(stream));
        let reader: Box<dyn Read> = if read == 2 && magic == GZIP_MAGIC {
            Box::new(GzDecoder::new(rewound))
        } else {
            rewound
        };

        Ok(Self {
            archive: tar::Archive::new(reader),
        })
    }

    /// Visits every entry in stream order. A malformed header or truncated
    /// body aborts the walk with [`Error::ArchiveCorrupt`].
    pub fn for_each(mut self, mut visit: impl FnMut(ArchiveEntry) -> Result<()>) -> Result<()> {
        let entries = self
            .archive
            .entries()
            .map_err(|e| Error::corrupt("cannot open archive", e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| Error::corrupt("malformed archive header", e))?;

            let (path, size, is_dir, is_symlink, uid, gid, uname, gname, header_bytes) = {
                let header = entry.header();
                let path = entry
                    .path()
                    .map_err(|e| Error::corrupt("malformed entry path", e))?;
                let path = normalize_path(&path.to_string_lossy());
                let entry_type = header.entry_type();
                (
                    path,
                    header
                        .size()
                        .map_err(|e| Error::corrupt("malformed entry size", e))?,
                    entry_type.is_dir(),
                    matches!(entry_type, tar::EntryType::Symlink),
                    header
                        .uid()
                        .map_err(|e| Error::corrupt("malformed entry uid", e))?,
                    header
                        .gid()
                        .map_err(|e| Error::corrupt("malformed entry gid", e))?,
                    header.username().ok().flatten().map(str::to_string),
                    header.groupname().ok().flatten().map(str::to_string),
                    header.as_bytes().to_vec(),
                )
            };

            let mut raw = header_bytes;
            entry
                .read_to_end(&mut raw)
                .map_err(|e| Error::corrupt("truncated entry body", e))?;

            visit(ArchiveEntry {
                path,
                raw,
                size,
                is_dir,
                is_symlink,
                uid,
                gid,
                uname,
                gname,
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_uid(0);
            header.set_gid(0);
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./a/b"), "a/b");
        assert_eq!(normalize_path("a/b"), "a/b");
        assert_eq!(normalize_path("."), "");
        assert_eq!(normalize_path("./"), "");
        assert_eq!(normalize_path("./etc/"), "etc");
        // Hidden files keep their dot
        assert_eq!(normalize_path("./.bashrc"), ".bashrc");
    }

    #[test]
    fn test_normalize_path_is_idempotent() {
        for raw in ["./a/b", "a/b", ".", "./", ".image.d/runscript"] {
            let once = normalize_path(raw);
            assert_eq!(normalize_path(&once), once);
        }
    }

    #[test]
    fn test_walk_preserves_order_and_raw_bytes() {
        let data = build_archive(&[
            ("./etc/passwd", b"root:x:0:0\n"),
            ("./usr/bin/env", b"#!/bin/sh\n"),
        ]);

        let walker = ArchiveWalker::new(Box::new(Cursor::new(data))).unwrap();
        let mut seen = Vec::new();
        walker
            .for_each(|entry| {
                assert!(!entry.is_dir);
                assert_eq!(entry.raw.len(), HEADER_LEN + entry.size as usize);
                seen.push((entry.path.clone(), entry.body().to_vec()));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                ("etc/passwd".to_string(), b"root:x:0:0\n".to_vec()),
                ("usr/bin/env".to_string(), b"#!/bin/sh\n".to_vec()),
            ]
        );
    }

    #[test]
    fn test_walk_gzipped_stream() {
        let plain = build_archive(&[("./etc/os-release", b"NAME=test\n")]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let gzipped = encoder.finish().unwrap();

        let walker = ArchiveWalker::new(Box::new(Cursor::new(gzipped))).unwrap();
        let mut paths = Vec::new();
        walker
            .for_each(|entry| {
                paths.push(entry.path.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(paths, vec!["etc/os-release".to_string()]);
    }

    #[test]
    fn test_directory_and_symlink_flags() {
        let mut builder = tar::Builder::new(Vec::new());

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_uid(0);
        dir.set_gid(0);
        builder.append_data(&mut dir, "./etc/", &b""[..]).unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        link.set_uid(0);
        link.set_gid(0);
        builder
            .append_link(&mut link, "./bin/sh", "busybox")
            .unwrap();

        let data = builder.into_inner().unwrap();
        let walker = ArchiveWalker::new(Box::new(Cursor::new(data))).unwrap();

        let mut flags = Vec::new();
        walker
            .for_each(|entry| {
                flags.push((entry.path.clone(), entry.is_dir, entry.is_symlink));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            flags,
            vec![
                ("etc".to_string(), true, false),
                ("bin/sh".to_string(), false, true),
            ]
        );
    }

    #[test]
    fn test_root_ownership_flag() {
        let mut builder = tar::Builder::new(Vec::new());

        let mut owned = tar::Header::new_gnu();
        owned.set_size(2);
        owned.set_uid(0);
        owned.set_gid(0);
        builder.append_data(&mut owned, "./etc/shadow", &b"x\n"[..]).unwrap();

        let mut user = tar::Header::new_gnu();
        user.set_size(2);
        user.set_uid(1000);
        user.set_gid(1000);
        builder.append_data(&mut user, "./home/file", &b"y\n"[..]).unwrap();

        let data = builder.into_inner().unwrap();
        let walker = ArchiveWalker::new(Box::new(Cursor::new(data))).unwrap();

        let mut owned_flags = Vec::new();
        walker
            .for_each(|entry| {
                owned_flags.push((entry.path.clone(), entry.root_owned()));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            owned_flags,
            vec![("etc/shadow".to_string(), true), ("home/file".to_string(), false)]
        );
    }

    #[test]
    fn test_corrupt_archive_aborts_walk() {
        // A block of 0xFF is not a valid tar header
        let garbage = vec![0xFFu8; 1024];
        let walker = ArchiveWalker::new(Box::new(Cursor::new(garbage))).unwrap();
        let err = walker.for_each(|_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::ArchiveCorrupt(_)));
    }

    #[test]
    fn test_empty_stream_yields_no_entries() {
        let walker = ArchiveWalker::new(Box::new(Cursor::new(Vec::new()))).unwrap();
        let mut count = 0;
        walker
            .for_each(|_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
