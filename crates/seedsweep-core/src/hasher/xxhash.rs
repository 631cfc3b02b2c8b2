use std::fs::{File, Metadata};
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use twox_hash::XxHash64;

use crate::cancel::CancelToken;
use crate::error::Error;

const CHUNK_SIZE: usize = 8 * 1024 * 1024; // 8 MiB

/// Stream `file` through XxHash64 and return the 16-char hex digest.
///
/// Cancellation is checked between chunks; a cancelled hash returns
/// `Error::Cancelled` and the partial state is dropped.
pub fn hash_file(file: &Path, cancel: &CancelToken) -> Result<String, Error> {
    let mut f = File::open(file).map_err(|e| Error::file_access(file, e))?;
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        cancel.check("hash completion")?;
        let read = match f.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::file_access(file, e)),
        };
        hasher.write(&buffer[..read]);
    }

    Ok(format_digest(hasher.finish()))
}

/// Digest of an in-memory buffer, same algorithm and format as [`hash_file`].
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    format_digest(hasher.finish())
}

fn format_digest(hash: u64) -> String {
    format!("{:016x}", hash)
}

/// Modification time in nanoseconds since the Unix epoch (negative before it).
pub fn mtime_nanos(metadata: &Metadata) -> io::Result<i64> {
    let modified = metadata.modified()?;
    let nanos = match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    };
    Ok(nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_stream_hash_matches_buffer_hash() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let streamed = hash_file(tmp.path(), &CancelToken::new()).unwrap();
        assert_eq!(streamed, hash_data(&data));
        assert_eq!(streamed.len(), 16);
    }

    #[test]
    fn test_missing_file_is_file_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_file(&dir.path().join("gone.mkv"), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::FileAccess { .. }));
    }

    #[test]
    fn test_cancelled_hash_returns_cancelled() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"some content").unwrap();
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            hash_file(tmp.path(), &token),
            Err(Error::Cancelled { .. })
        ));
    }
}
