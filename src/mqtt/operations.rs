/// Topics and payloads published to the broker
use time::{OffsetDateTime, UtcOffset};

use crate::models::HostStats;
use crate::utils::{format_timestamp, HostProbe};

pub const ONLINE: &str = "Online";
pub const OFFLINE: &str = "Offline";

/// Filter subscribed on every successful connect
pub const POWER_FILTER: &str = "stat/+/POWER";

/// Per-device topic names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub lwt: String,
    pub state: String,
}

impl Topics {
    pub fn new(device_name: &str) -> Self {
        Self {
            lwt: format!("tele/{}/LWT", device_name),
            state: format!("tele/{}/STATE", device_name),
        }
    }
}

/// Presence payload for the LWT topic
pub fn presence_payload(online: bool) -> &'static str {
    if online {
        ONLINE
    } else {
        OFFLINE
    }
}

/// Build the STATE JSON document
///
/// Current, voltage and their product are included only when both
/// readings are present and not NaN. Numbers are written with two
/// decimals.
pub fn state_payload(time: &str, host: &HostStats, readings: Option<(f64, f64)>) -> String {
    let readings = readings.filter(|(current, voltage)| !current.is_nan() && !voltage.is_nan());
    match readings {
        Some((current, voltage)) => format!(
            "{{\"Time\":\"{}\", \"Uptime\": {}, \"LoadAverage\":{:.2}, \"CPUTemp\":{}, \"Current\":{:.2}, \"Voltage\":{:.2}, \"Power\":{:.2}}}",
            time,
            host.uptime_hours,
            host.load_average,
            host.cpu_temp,
            current,
            voltage,
            current * voltage
        ),
        None => format!(
            "{{\"Time\":\"{}\", \"Uptime\": {}, \"LoadAverage\":{:.2}, \"CPUTemp\":{}}}",
            time, host.uptime_hours, host.load_average, host.cpu_temp
        ),
    }
}

/// Renders STATE documents stamped with the current host statistics and local time
#[derive(Debug, Clone)]
pub struct StateReport {
    probe: HostProbe,
    offset: UtcOffset,
}

impl StateReport {
    pub fn new(probe: HostProbe, offset: UtcOffset) -> Self {
        Self { probe, offset }
    }

    pub fn render(&self, readings: Option<(f64, f64)>) -> String {
        let time = format_timestamp(OffsetDateTime::now_utc(), self.offset);
        state_payload(&time, &self.probe.sample(), readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn host() -> HostStats {
        HostStats {
            uptime_hours: 26,
            load_average: 0.4242,
            cpu_temp: 48,
        }
    }

    #[test]
    fn test_topics() {
        let topics = Topics::new("main-batt");
        assert_eq!(topics.lwt, "tele/main-batt/LWT");
        assert_eq!(topics.state, "tele/main-batt/STATE");
    }

    #[test]
    fn test_presence_payload() {
        assert_eq!(presence_payload(true), "Online");
        assert_eq!(presence_payload(false), "Offline");
    }

    #[test]
    fn test_state_payload_with_readings() {
        let payload = state_payload("2024-03-01T12:00:00", &host(), Some((2.5, 52.0)));
        let json: Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(json["Time"], "2024-03-01T12:00:00");
        assert_eq!(json["Uptime"], 26);
        assert_eq!(json["LoadAverage"], 0.42);
        assert_eq!(json["CPUTemp"], 48);
        assert_eq!(json["Current"], 2.5);
        assert_eq!(json["Voltage"], 52.0);
        assert_eq!(json["Power"], 130.0);
        assert!(payload.contains("\"Current\":2.50"));
    }

    #[test]
    fn test_state_payload_without_readings() {
        for readings in [None, Some((f64::NAN, f64::NAN)), Some((1.0, f64::NAN))] {
            let payload = state_payload("2024-03-01T12:00:00", &host(), readings);
            let json: Value = serde_json::from_str(&payload).unwrap();
            let fields = json.as_object().unwrap();

            assert_eq!(fields.len(), 4);
            assert!(!fields.contains_key("Current"));
            assert!(!fields.contains_key("Voltage"));
            assert!(!fields.contains_key("Power"));
        }
    }

    #[test]
    fn test_state_report_render() {
        let dir = tempfile::tempdir().unwrap();
        let probe = HostProbe::with_paths(
            dir.path().join("uptime"),
            dir.path().join("loadavg"),
            dir.path().join("temp"),
        );
        let report = StateReport::new(probe, UtcOffset::UTC);

        let json: Value = serde_json::from_str(&report.render(Some((1.0, 12.0)))).unwrap();
        let time = json["Time"].as_str().unwrap();
        assert_eq!(time.len(), "YYYY-MM-DDTHH:MM:SS".len());
        assert_eq!(&time[10..11], "T");
        assert_eq!(json["Uptime"], 0);
        assert_eq!(json["Power"], 12.0);
    }
}
