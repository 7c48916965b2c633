//! End-of-run summary.

use crate::state::ProcessingStatus;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub deployment_check: bool,
    /// Calls returned by the provider for the window.
    pub retrieved: usize,
    /// Calls with no state entry.
    pub new: usize,
    /// New calls that are not inbound.
    pub skipped_not_inbound: usize,
    /// New inbound calls whose recording is not available yet.
    pub awaiting_recording: usize,
    /// Calls that entered processing.
    pub eligible: usize,
    pub outcomes: BTreeMap<ProcessingStatus, usize>,
}

impl RunReport {
    pub fn record(&mut self, status: ProcessingStatus) {
        *self.outcomes.entry(status).or_default() += 1;
    }

    pub fn count(&self, status: ProcessingStatus) -> usize {
        self.outcomes.get(&status).copied().unwrap_or(0)
    }

    pub fn processed(&self) -> usize {
        self.outcomes.values().sum()
    }

    pub fn alerts_sent(&self) -> usize {
        self.count(ProcessingStatus::CriticalAlertSent)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.deployment_check {
            writeln!(f, "Deployment check (history ignored, nothing recorded)")?;
        }
        writeln!(f, "Calls retrieved:        {}", self.retrieved)?;
        writeln!(f, "New calls:              {}", self.new)?;
        writeln!(f, "Skipped (not inbound):  {}", self.skipped_not_inbound)?;
        writeln!(f, "Awaiting recording:     {}", self.awaiting_recording)?;
        writeln!(f, "Processed:              {}", self.processed())?;
        for status in ProcessingStatus::ALL {
            let n = self.count(status);
            if n > 0 {
                writeln!(f, "  {:<22}{n}", status.as_str())?;
            }
        }
        write!(f, "Alerts sent:            {}", self.alerts_sent())
    }
}
