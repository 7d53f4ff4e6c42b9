//! Tar member extraction (plain or gzip-compressed)

use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Component, Path};
use tracing::warn;

use crate::error::{IngestError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on the buffer reserved from a member's declared size.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// One regular file from an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Relative, `/`-separated path
    pub path: String,
    pub data: Bytes,
}

#[derive(Debug, Default)]
pub struct ArchiveContents {
    pub members: Vec<Member>,
    /// Entries that were not regular files or had unsafe paths
    pub ignored: u64,
}

/// Relative path with `.` dropped, or `None` if it escapes the root.
pub fn normalize_member_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Read every regular-file member of a tar or tar.gz archive.
///
/// Blocking; run it on a blocking thread for large archives.
pub fn read_members(data: &[u8]) -> Result<ArchiveContents> {
    if data.starts_with(&GZIP_MAGIC) {
        collect(GzDecoder::new(data))
    } else {
        collect(data)
    }
}

fn collect<R: Read>(reader: R) -> Result<ArchiveContents> {
    let mut archive = tar::Archive::new(reader);
    let mut contents = ArchiveContents::default();

    let entries = archive
        .entries()
        .map_err(|e| IngestError::malformed(format!("tar archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| IngestError::malformed(format!("tar entry: {}", e)))?;

        if !entry.header().entry_type().is_file() {
            contents.ignored += 1;
            continue;
        }

        let raw_path = entry
            .path()
            .map_err(|e| IngestError::malformed(format!("tar entry path: {}", e)))?
            .into_owned();
        let Some(path) = normalize_member_path(&raw_path) else {
            warn!(path = %raw_path.display(), "Skipping archive member with unsafe path");
            contents.ignored += 1;
            continue;
        };

        // header sizes are untrusted; never reserve more than a bounded amount
        let declared = entry.size();
        let mut buffer = Vec::with_capacity(declared.min(MAX_PREALLOC) as usize);
        entry
            .read_to_end(&mut buffer)
            .map_err(|e| IngestError::malformed(format!("tar member {}: {}", path, e)))?;
        if buffer.len() as u64 != declared {
            return Err(IngestError::malformed(format!(
                "tar member {} is truncated: header says {} bytes, archive holds {}",
                path,
                declared,
                buffer.len()
            )));
        }

        contents.members.push(Member {
            path,
            data: Bytes::from(buffer),
        });
    }

    Ok(contents)
}
