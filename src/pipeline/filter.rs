use crate::models::Reading;

/// Remembers the last reading so only changes get logged
#[derive(Debug, Default)]
pub struct ChangeFilter {
    last: Option<Reading>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and stores `reading` if any field differs from the last
    /// stored one. NaN never compares equal, so a NaN field always counts
    /// as a change.
    pub fn should_log(&mut self, reading: &Reading) -> bool {
        let changed = match &self.last {
            None => true,
            Some(last) => {
                last.voltage != reading.voltage
                    || last.current != reading.current
                    || last.temperature != reading.temperature
                    || last.capacity_ah != reading.capacity_ah
                    || last.capacity_wh != reading.capacity_wh
            }
        };

        if changed {
            self.last = Some(*reading);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(voltage: f64) -> Reading {
        Reading {
            voltage,
            current: 1.5,
            temperature: 21.0,
            capacity_ah: 3.2,
            capacity_wh: 40.0,
        }
    }

    #[test]
    fn test_first_reading_is_logged() {
        let mut filter = ChangeFilter::new();
        assert!(filter.should_log(&reading(12.0)));
    }

    #[test]
    fn test_repeated_reading_logged_once() {
        let mut filter = ChangeFilter::new();
        assert!(filter.should_log(&reading(12.0)));
        assert!(!filter.should_log(&reading(12.0)));
        assert!(!filter.should_log(&reading(12.0)));
    }

    #[test]
    fn test_any_field_change_is_logged() {
        let mut filter = ChangeFilter::new();
        let base = reading(12.0);
        filter.should_log(&base);

        let warmer = Reading {
            temperature: 22.0,
            ..base
        };
        assert!(filter.should_log(&warmer));
        assert!(!filter.should_log(&warmer));
        assert!(filter.should_log(&base));
    }

    #[test]
    fn test_nan_always_counts_as_change() {
        let mut filter = ChangeFilter::new();
        assert!(filter.should_log(&reading(f64::NAN)));
        assert!(filter.should_log(&reading(f64::NAN)));
    }
}
