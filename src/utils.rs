/// Utility functions for formatting and host telemetry
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use time::{format_description, OffsetDateTime, UtcOffset};

use crate::models::HostStats;

const HEX_DUMP_WIDTH: usize = 16;

/// Format a timestamp as YYYY-MM-DDTHH:MM:SS in the given offset
///
/// Falls back to the default string representation if formatting fails.
pub fn format_timestamp(dt: OffsetDateTime, offset: UtcOffset) -> String {
    let local = dt.to_offset(offset);
    format_description::parse("[year]-[month]-[day]T[hour]:[minute]:[second]")
        .ok()
        .and_then(|format| local.format(&format).ok())
        .unwrap_or_else(|| local.to_string())
}

/// Render bytes as hex dump lines, 16 bytes per line with a printable ASCII column
pub fn hex_dump(data: &[u8]) -> Vec<String> {
    data.chunks(HEX_DUMP_WIDTH)
        .map(|chunk| {
            let hex_part = chunk
                .iter()
                .map(|b| hex::encode([*b]))
                .collect::<Vec<_>>()
                .join(" ");
            let ascii: String = chunk
                .iter()
                .map(|&b| {
                    if b.is_ascii_graphic() || b == b' ' {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            format!("{:<width$}  {}", hex_part, ascii, width = HEX_DUMP_WIDTH * 3 - 1)
        })
        .collect()
}

/// Reads uptime, load and CPU temperature from procfs and sysfs
#[derive(Debug, Clone)]
pub struct HostProbe {
    uptime_path: PathBuf,
    loadavg_path: PathBuf,
    thermal_path: PathBuf,
}

impl HostProbe {
    pub fn new(thermal_zone: u32) -> Self {
        Self {
            uptime_path: PathBuf::from("/proc/uptime"),
            loadavg_path: PathBuf::from("/proc/loadavg"),
            thermal_path: PathBuf::from(format!(
                "/sys/class/thermal/thermal_zone{}/temp",
                thermal_zone
            )),
        }
    }

    /// Probe reading from explicit file locations
    #[cfg(test)]
    pub fn with_paths(
        uptime_path: impl Into<PathBuf>,
        loadavg_path: impl Into<PathBuf>,
        thermal_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            uptime_path: uptime_path.into(),
            loadavg_path: loadavg_path.into(),
            thermal_path: thermal_path.into(),
        }
    }

    /// Collect current host statistics
    ///
    /// A source that can't be read or parsed is logged and reported as zero.
    pub fn sample(&self) -> HostStats {
        let uptime_secs: f64 = self.first_field(&self.uptime_path).unwrap_or(0.0);
        let load_average: f64 = self.first_field(&self.loadavg_path).unwrap_or(0.0);
        let millidegrees: i64 = self.first_field(&self.thermal_path).unwrap_or(0);

        HostStats {
            uptime_hours: (uptime_secs / 3600.0) as u64,
            load_average,
            cpu_temp: millidegrees / 1000,
        }
    }

    fn first_field<T: std::str::FromStr>(&self, path: &Path) -> Option<T> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };
        let value = contents
            .split_whitespace()
            .next()
            .and_then(|field| field.parse().ok());
        if value.is_none() {
            warn!("Unexpected contents in {}: {:?}", path.display(), contents.trim());
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_format_timestamp() {
        let dt = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(format_timestamp(dt, UtcOffset::UTC), "2023-11-14T22:13:20");

        let plus_two = UtcOffset::from_hms(2, 0, 0).unwrap();
        assert_eq!(format_timestamp(dt, plus_two), "2023-11-15T00:13:20");
    }

    #[test]
    fn test_hex_dump_rows() {
        let data: Vec<u8> = (0x41..0x41 + 20).collect();
        let lines = hex_dump(&data);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("41 42 43"));
        assert!(lines[0].ends_with("ABCDEFGHIJKLMNOP"));
        assert!(lines[1].starts_with("51 52 53 54 "));
        assert!(lines[1].ends_with("  QRST"));
        assert_eq!(lines[0].len(), lines[1].len() + 12);
    }

    #[test]
    fn test_hex_dump_non_printable() {
        let lines = hex_dump(&[0xff, 0x55, 0x00]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ff 55 00"));
        assert!(lines[0].ends_with(".U."));
        assert!(hex_dump(&[]).is_empty());
    }

    #[test]
    fn test_host_probe_sample() {
        let uptime = file_with("93784.51 371022.88\n");
        let loadavg = file_with("0.42 0.37 0.30 1/245 1234\n");
        let thermal = file_with("48312\n");

        let probe = HostProbe::with_paths(uptime.path(), loadavg.path(), thermal.path());
        let stats = probe.sample();
        assert_eq!(stats.uptime_hours, 26);
        assert_eq!(stats.load_average, 0.42);
        assert_eq!(stats.cpu_temp, 48);
    }

    #[test]
    fn test_host_probe_missing_sources() {
        let dir = tempfile::tempdir().unwrap();
        let probe = HostProbe::with_paths(
            dir.path().join("uptime"),
            dir.path().join("loadavg"),
            dir.path().join("temp"),
        );
        assert_eq!(probe.sample(), HostStats::default());
    }
}
