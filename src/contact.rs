use tracing::debug;

/// Consecutive missed-contact samples tolerated before contact is reported lost
pub const DEFAULT_CONTACT_TOLERANCE: u32 = 3;

/// Debounces the strap's sensor-contact flag
///
/// Straps intermittently misreport contact for single samples, so contact is
/// only reported lost once `tolerance` consecutive samples say so.
#[derive(Debug, Clone)]
pub struct ContactToleranceFilter {
    tolerance: u32,
    consecutive_misses: u32,
}

impl ContactToleranceFilter {
    pub fn new() -> Self {
        Self::with_tolerance(DEFAULT_CONTACT_TOLERANCE)
    }

    pub fn with_tolerance(tolerance: u32) -> Self {
        Self {
            tolerance: tolerance.max(1),
            consecutive_misses: 0,
        }
    }

    /// Feed the raw contact flag and get the effective one
    pub fn update(&mut self, raw_contact: bool) -> bool {
        if raw_contact {
            if self.consecutive_misses >= self.tolerance {
                debug!("Sensor contact restored");
            }
            self.consecutive_misses = 0;
            return true;
        }

        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        if self.consecutive_misses == self.tolerance {
            debug!(
                "Sensor contact lost after {} consecutive misses",
                self.consecutive_misses
            );
        }
        self.consecutive_misses < self.tolerance
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn reset(&mut self) {
        self.consecutive_misses = 0;
    }
}

impl Default for ContactToleranceFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_third_consecutive_miss_reports_lost() {
        let mut filter = ContactToleranceFilter::new();
        let effective: Vec<bool> = [true, false, false, false]
            .into_iter()
            .map(|raw| filter.update(raw))
            .collect();
        assert_eq!(effective, vec![true, true, true, false]);
    }

    #[test]
    fn test_contact_resets_counter() {
        let mut filter = ContactToleranceFilter::new();
        assert!(filter.update(false));
        assert!(filter.update(false));
        assert!(filter.update(true));
        assert_eq!(filter.consecutive_misses(), 0);
        assert!(filter.update(false));
        assert!(filter.update(false));
        assert!(!filter.update(false));
        assert!(!filter.update(false));
        assert!(filter.update(true));
    }

    #[test]
    fn test_custom_tolerance() {
        let mut filter = ContactToleranceFilter::with_tolerance(1);
        assert!(!filter.update(false));

        // Zero tolerance is clamped to one
        let mut filter = ContactToleranceFilter::with_tolerance(0);
        assert!(!filter.update(false));
    }
}
