//! sysfs file helpers
//!
//! Every sysfs attribute is a short text file; these wrappers attach the
//! path to any I/O error so callers get a useful message.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{PiPowerError, Result};

/// Read an attribute and trim surrounding whitespace
pub fn read_trimmed(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| PiPowerError::FileRead { path: path.to_path_buf(), source: e })
}

/// Read and parse a numeric attribute
pub fn read_number<T: std::str::FromStr>(path: &Path) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = read_trimmed(path)?;
    raw.parse::<T>().map_err(|e| PiPowerError::FileRead {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to parse '{}': {}", raw, e),
        ),
    })
}

/// Write an attribute
pub fn write_attr(path: &Path, value: &str) -> Result<()> {
    trace!("sysfs write {:?} <- {}", path, value);
    fs::write(path, value)
        .map_err(|e| PiPowerError::FileWrite { path: path.to_path_buf(), source: e })
}

/// Find the device directory below `root` whose `name` attribute matches one
/// of `names`. Entries are visited in sorted order so the choice is stable.
pub fn find_device_by_name(root: &Path, names: &[&str]) -> Option<(PathBuf, String)> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs.into_iter().find_map(|dir| {
        let name = read_trimmed(&dir.join("name")).ok()?;
        names.contains(&name.as_str()).then_some((dir, name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_parses_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("in1_input");
        fs::write(&p, "12040\n").unwrap();
        assert_eq!(read_trimmed(&p).unwrap(), "12040");
        assert_eq!(read_number::<i64>(&p).unwrap(), 12040);

        fs::write(&p, "garbage").unwrap();
        assert!(read_number::<i64>(&p).is_err());
        let missing = read_trimmed(&dir.path().join("nope"));
        assert!(matches!(missing, Err(PiPowerError::FileRead { .. })));
    }

    #[test]
    fn finds_device_by_name() {
        let dir = tempfile::tempdir().unwrap();
        for (d, name) in [("hwmon0", "cpu_thermal"), ("hwmon1", "ina219")] {
            fs::create_dir_all(dir.path().join(d)).unwrap();
            fs::write(dir.path().join(d).join("name"), format!("{}\n", name)).unwrap();
        }
        let (path, name) = find_device_by_name(dir.path(), &["ina219", "ina226"]).unwrap();
        assert_eq!(path, dir.path().join("hwmon1"));
        assert_eq!(name, "ina219");
        assert!(find_device_by_name(dir.path(), &["bh1750"]).is_none());
        assert!(find_device_by_name(&dir.path().join("missing"), &["ina219"]).is_none());
    }
}
