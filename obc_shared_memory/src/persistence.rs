//! Raw byte-image dumps of segment contents
//!
//! A dump is the segment's bytes written verbatim. There is no header or
//! version: a layout change makes old dumps load as garbage.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Write `bytes` to `path`, replacing any previous dump.
///
/// The image goes to a sibling temp file first and is renamed into place,
/// so a crash mid-write leaves the previous dump intact.
pub fn save_dump(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    let mut file = fs::File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp, path)
}

/// Load up to `size` bytes of a dump. `Ok(None)` if no dump exists.
///
/// A short dump yields a short buffer; the caller zero-fills the rest.
pub fn load_dump(path: &Path, size: usize) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(mut bytes) => {
            bytes.truncate(size);
            Ok(Some(bytes))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.bin");
        save_dump(&path, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(load_dump(&path, 3).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(load_dump(&path, 16).unwrap(), Some(vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn missing_dump_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_dump(&dir.path().join("absent.bin"), 4).unwrap(), None);
    }
}
