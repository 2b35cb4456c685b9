//! Port allocation for new endpoints.

use axo_types::{AxoError, AxoResult};
use std::collections::HashSet;
use std::fmt;

/// Inclusive range of ports endpoints may be given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> AxoResult<Self> {
        if start > end {
            return Err(AxoError::validation(format!(
                "port range start {} is above end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Reads `AXO_PORT_RANGE_START` and `AXO_PORT_RANGE_END`; an unset,
    /// unparsable or inverted range falls back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let start: u16 = std::env::var("AXO_PORT_RANGE_START")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.start);
        let end: u16 = std::env::var("AXO_PORT_RANGE_END")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.end);
        Self::new(start, end).unwrap_or(defaults)
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 16000,
            end: 16999,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Lowest port in `range` that is not in `used`.
pub fn allocate_port(range: &PortRange, used: &HashSet<u16>) -> AxoResult<u16> {
    (range.start..=range.end)
        .find(|port| !used.contains(port))
        .ok_or_else(|| AxoError::already_exists(format!("every port in {} is taken", range)))
}

/// Two distinct free ports: `(request_port, event_port)`.
pub fn allocate_port_pair(range: &PortRange, used: &HashSet<u16>) -> AxoResult<(u16, u16)> {
    let first = allocate_port(range, used)?;
    let mut held = used.clone();
    held.insert(first);
    let second = allocate_port(range, &held)?;
    Ok((first, second))
}
