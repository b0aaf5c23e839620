/// One decoded sample from the battery monitor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Volts
    pub voltage: f64,
    /// Amps
    pub current: f64,
    /// Reported as-is by the device, no scaling applied
    pub temperature: f64,
    /// Amp-hours
    pub capacity_ah: f64,
    /// Watt-hours
    pub capacity_wh: f64,
}

/// A message received from the broker on one of our subscriptions
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Host health values attached to every STATE message
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HostStats {
    pub uptime_hours: u64,
    pub load_average: f64,
    pub cpu_temp: i64,
}
