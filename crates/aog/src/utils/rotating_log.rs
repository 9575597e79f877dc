//! Size-rotated log files for supervised engine processes
//!
//! Engines run detached with stdout/stderr rebound to files under the log
//! directory. Rotation happens at open time: when the current file exceeds
//! the cap it is shifted to `.1`, pushing older generations up to `keep`.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_KEEP: usize = 3;

/// Open `path` for appending, rotating first if it exceeds `max_bytes`.
pub fn open_rotating(path: &Path, max_bytes: u64, keep: usize) -> io::Result<File> {
    if let Ok(metadata) = std::fs::metadata(path)
        && metadata.len() >= max_bytes
    {
        rotate(path, keep)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn rotate(path: &Path, keep: usize) -> io::Result<()> {
    let name = path
        .to_str()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "non-UTF8 log path"))?;

    let oldest = format!("{name}.{keep}");
    let _ = std::fs::remove_file(&oldest);
    for index in (1..keep).rev() {
        let from = format!("{name}.{index}");
        let to = format!("{name}.{}", index + 1);
        let _ = std::fs::rename(&from, &to);
    }
    std::fs::rename(name, format!("{name}.1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn oversized_file_is_shifted_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.log");
        std::fs::write(&path, vec![b'x'; 128]).unwrap();

        let mut file = open_rotating(&path, 64, 2).unwrap();
        writeln!(file, "fresh").unwrap();

        assert!(dir.path().join("engine.log.1").exists());
        let fresh = std::fs::read_to_string(&path).unwrap();
        assert_eq!(fresh.trim(), "fresh");
    }

    #[test]
    fn generations_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.log");
        for round in 0..5 {
            std::fs::write(&path, vec![b'0' + round as u8; 128]).unwrap();
            open_rotating(&path, 64, 2).unwrap();
        }
        assert!(dir.path().join("engine.log.1").exists());
        assert!(dir.path().join("engine.log.2").exists());
        assert!(!dir.path().join("engine.log.3").exists());
    }
}
