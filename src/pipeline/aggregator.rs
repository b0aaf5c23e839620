/// Running sums of current and voltage over one publish window
#[derive(Debug, Default)]
pub struct SampleAggregator {
    sum_current: f64,
    sum_voltage: f64,
    count: u32,
}

/// Mean values of a publish window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowMean {
    Samples {
        current: f64,
        voltage: f64,
        count: u32,
    },
    Empty,
}

impl WindowMean {
    /// (current, voltage), or `None` when the window had no samples
    pub fn readings(&self) -> Option<(f64, f64)> {
        match *self {
            WindowMean::Samples {
                current, voltage, ..
            } => Some((current, voltage)),
            WindowMean::Empty => None,
        }
    }
}

impl SampleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, current: f64, voltage: f64) {
        self.sum_current += current;
        self.sum_voltage += voltage;
        self.count += 1;
    }

    /// Mean of everything added since the last [`reset`](Self::reset).
    ///
    /// Does not clear the sums: the caller resets only once the mean has
    /// been accepted for publishing, so a failed publish carries the
    /// samples over into the next window.
    pub fn flush(&self) -> WindowMean {
        if self.count == 0 {
            return WindowMean::Empty;
        }
        let count = self.count as f64;
        WindowMean::Samples {
            current: self.sum_current / count,
            voltage: self.sum_voltage / count,
            count: self.count,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}
