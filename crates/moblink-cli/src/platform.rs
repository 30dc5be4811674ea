//! Device status from sysfs.

use moblink_core::status::ThermalSeverity;
use moblink_core::{StatusSnapshot, StatusSource, ThermalState};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads battery capacity and thermal zone temperatures from sysfs.
#[derive(Debug, Clone)]
pub struct SysfsStatus {
    power_supply_dir: PathBuf,
    thermal_dir: PathBuf,
}

impl Default for SysfsStatus {
    fn default() -> Self {
        Self::new("/sys/class/power_supply", "/sys/class/thermal")
    }
}

impl SysfsStatus {
    /// Read from custom sysfs roots.
    pub fn new(power_supply_dir: impl Into<PathBuf>, thermal_dir: impl Into<PathBuf>) -> Self {
        Self {
            power_supply_dir: power_supply_dir.into(),
            thermal_dir: thermal_dir.into(),
        }
    }

    /// Capacity of the first battery, if any.
    fn battery_percentage(&self) -> Option<i32> {
        let mut supplies = entries(&self.power_supply_dir, "");
        supplies.sort();
        supplies
            .iter()
            .filter(|supply| read_trimmed(&supply.join("type")).as_deref() == Some("Battery"))
            .find_map(|supply| read_trimmed(&supply.join("capacity"))?.parse().ok())
    }

    /// Hottest thermal zone in millidegrees Celsius.
    fn max_temperature(&self) -> Option<i64> {
        entries(&self.thermal_dir, "thermal_zone")
            .iter()
            .filter_map(|zone| read_trimmed(&zone.join("temp"))?.parse::<i64>().ok())
            .max()
    }
}

impl StatusSource for SysfsStatus {
    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            battery_percentage: self.battery_percentage().unwrap_or(100),
            thermal_state: self
                .max_temperature()
                .map(|temp| ThermalState::from(severity(temp))),
        }
    }
}

/// Map a temperature in millidegrees Celsius to a throttling severity.
fn severity(millidegrees: i64) -> ThermalSeverity {
    match millidegrees / 1000 {
        i64::MIN..45 => ThermalSeverity::None,
        45..50 => ThermalSeverity::Light,
        50..55 => ThermalSeverity::Moderate,
        55..65 => ThermalSeverity::Severe,
        65..75 => ThermalSeverity::Critical,
        75..85 => ThermalSeverity::Emergency,
        _ => ThermalSeverity::Shutdown,
    }
}

fn entries(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return Vec::new();
    };
    read_dir
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .collect()
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|contents| contents.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, contents: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn sysfs() -> (TempDir, SysfsStatus) {
        let dir = TempDir::new().unwrap();
        let status = SysfsStatus::new(dir.path().join("power_supply"), dir.path().join("thermal"));
        (dir, status)
    }

    #[test]
    fn test_empty_sysfs() {
        let (_dir, status) = sysfs();
        assert_eq!(
            status.snapshot(),
            StatusSnapshot {
                battery_percentage: 100,
                thermal_state: None,
            }
        );
    }

    #[test]
    fn test_battery_skips_non_batteries() {
        let (dir, status) = sysfs();
        write(dir.path(), "power_supply/AC/type", "Mains\n");
        write(dir.path(), "power_supply/AC/capacity", "12\n");
        write(dir.path(), "power_supply/BAT0/type", "Battery\n");
        write(dir.path(), "power_supply/BAT0/capacity", "67\n");
        assert_eq!(status.snapshot().battery_percentage, 67);
    }

    #[test]
    fn test_hottest_zone_wins() {
        let (dir, status) = sysfs();
        write(dir.path(), "thermal/thermal_zone0/temp", "38000\n");
        write(dir.path(), "thermal/thermal_zone1/temp", "52000\n");
        write(dir.path(), "thermal/cooling_device0/temp", "99000\n");
        assert_eq!(status.snapshot().thermal_state, Some(ThermalState::Warm));
    }

    #[test]
    fn test_severity_buckets() {
        assert_eq!(ThermalState::from(severity(30_000)), ThermalState::Quiet);
        assert_eq!(ThermalState::from(severity(-5_000)), ThermalState::Quiet);
        assert_eq!(ThermalState::from(severity(47_500)), ThermalState::Warm);
        assert_eq!(ThermalState::from(severity(60_000)), ThermalState::Hot);
        assert_eq!(ThermalState::from(severity(120_000)), ThermalState::Hot);
    }
}
