use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use bytes::{Buf, BufMut};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::version::VersionEdit;

/// The manifest file name inside the data directory.
pub const MANIFEST_NAME: &str = "MANIFEST";

/*
Record framing (little-endian):

    u32 length | payload | u32 crc32(payload)

The payload is a serialized VersionEdit. Appends are fsynced before the
edit's version is published, making the manifest the on-disk authority for
the file set.
*/
pub struct Manifest {
    file: Arc<Mutex<File>>,
}

impl Manifest {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .create_new(true)
            .write(true)
            .open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Reopen an existing manifest and decode every record. Any framing or
    /// checksum damage is fatal; a half-written tail is damage too.
    pub fn recover(path: impl AsRef<Path>) -> Result<(Self, Vec<VersionEdit>)> {
        let mut file = OpenOptions::new().read(true).append(true).open(path)?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        let mut edits = Vec::new();
        let mut buf = &raw[..];
        while buf.has_remaining() {
            if buf.remaining() < 4 {
                return Err(Error::CorruptManifest("truncated record length".to_string()));
            }
            let len = buf.get_u32_le() as usize;
            if buf.remaining() < len + 4 {
                return Err(Error::CorruptManifest("truncated record payload".to_string()));
            }
            let payload = &buf[..len];
            buf.advance(len);
            let crc = buf.get_u32_le();
            if crc32fast::hash(payload) != crc {
                return Err(Error::CorruptManifest("record checksum mismatch".to_string()));
            }
            let edit: VersionEdit = serde_json::from_slice(payload)
                .map_err(|e| Error::CorruptManifest(format!("undecodable edit: {e}")))?;
            edits.push(edit);
        }

        Ok((
            Self {
                file: Arc::new(Mutex::new(file)),
            },
            edits,
        ))
    }

    /// Append one edit and fsync. The caller publishes the new version only
    /// after this returns.
    pub fn add_record(&self, edit: &VersionEdit) -> Result<()> {
        let payload =
            serde_json::to_vec(edit).map_err(|e| Error::CorruptManifest(format!("encode: {e}")))?;
        let mut record = Vec::with_capacity(payload.len() + 8);
        record.put_u32_le(payload.len() as u32);
        record.put_slice(&payload);
        record.put_u32_le(crc32fast::hash(&payload));

        let mut file = self.file.lock();
        file.write_all(&record)?;
        file.sync_all()?;
        Ok(())
    }
}
