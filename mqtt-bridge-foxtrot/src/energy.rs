//! Trapezoidal energy integration over successive power samples.

/// Milliseconds per hour.
const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// One power sample and the wall-clock time it was received, in ms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSample {
    pub power: f64,
    pub timestamp_ms: i64,
}

/// Running energy total of one variable.
///
/// Power in kW gives energy in kWh. The total lives as long as the process;
/// nothing resets it, including controller reconnects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyAccumulator {
    last_sample: Option<PowerSample>,
    total: f64,
}

impl EnergyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a new power sample.
    ///
    /// Returns the updated total, or `None` for the first sample, which only
    /// establishes the baseline. A timestamp earlier than the previous one
    /// adds nothing.
    pub fn update(&mut self, power: f64, timestamp_ms: i64) -> Option<f64> {
        let total = self.last_sample.map(|previous| {
            let elapsed_ms = timestamp_ms.saturating_sub(previous.timestamp_ms).max(0);
            let hours = elapsed_ms as f64 / MILLIS_PER_HOUR;
            let average = (previous.power + power) / 2.0;
            self.total += average * hours;
            self.total
        });

        self.last_sample = Some(PowerSample {
            power,
            timestamp_ms,
        });

        total
    }

    /// Accumulated energy so far.
    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn last_sample(&self) -> Option<PowerSample> {
        self.last_sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_is_baseline_only() {
        let mut acc = EnergyAccumulator::new();
        assert_eq!(acc.update(2.0, 1_000), None);
        assert_eq!(acc.total(), 0.0);
        assert_eq!(
            acc.last_sample(),
            Some(PowerSample {
                power: 2.0,
                timestamp_ms: 1_000
            })
        );
    }

    #[test]
    fn test_trapezoid() {
        let mut acc = EnergyAccumulator::new();
        acc.update(2.0, 0);

        // 30 minutes between 2 kW and 4 kW: avg 3 kW * 0.5 h
        let total = acc.update(4.0, 1_800_000).unwrap();
        assert!((total - 1.5).abs() < 1e-12);

        // 1 hour flat at 4 kW
        let total = acc.update(4.0, 5_400_000).unwrap();
        assert!((total - 5.5).abs() < 1e-12);
    }

    #[test]
    fn test_five_second_poll() {
        let mut acc = EnergyAccumulator::new();
        acc.update(3.6, 0);
        let total = acc.update(3.6, 5_000).unwrap();
        // 3.6 kW for 5 s = 0.005 kWh
        assert_eq!(format!("{:.3}", total), "0.005");
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let mut acc = EnergyAccumulator::new();
        acc.update(1.0, 10_000);
        acc.update(1.0, 3_610_000);
        let before = acc.total();

        assert_eq!(acc.update(1.0, 5_000), Some(before));
        assert_eq!(acc.last_sample().unwrap().timestamp_ms, 5_000);
    }
}
