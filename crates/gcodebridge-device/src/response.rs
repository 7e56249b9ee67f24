//! GRBL response classification
//!
//! Classifies each line read from the device by prefix and shape:
//! `ok` acknowledgements, `error:`/`ALARM:` errors, `<...>` status reports,
//! and everything else (banner text, `[MSG:...]` lines) as informational.

/// Classification of a single response line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// `ok`, optionally followed by whitespace; terminal for an in-flight command
    Ack,
    /// `error:*`; terminal for an in-flight command
    Error,
    /// `ALARM:*`; terminal for an in-flight command
    Alarm,
    /// Angle-bracketed `<...>` frame; terminal only for probes and status queries
    StatusReport,
    /// Anything else; forwarded to the current waiter, otherwise dropped
    Informational,
}

impl ResponseClass {
    /// Classify a response line
    pub fn classify(line: &str) -> Self {
        let trimmed = line.trim_end();

        if trimmed == "ok" {
            return Self::Ack;
        }
        if trimmed.starts_with("error:") {
            return Self::Error;
        }
        if trimmed.starts_with("ALARM:") {
            return Self::Alarm;
        }
        if trimmed.starts_with('<') && trimmed.ends_with('>') {
            return Self::StatusReport;
        }

        Self::Informational
    }

    /// Whether this frame completes a normal (non-probe) command
    pub fn is_command_terminal(&self) -> bool {
        matches!(self, Self::Ack | Self::Error | Self::Alarm)
    }
}

/// Extract the machine state name from a status report line.
///
/// Handles both delimiters GRBL has used over the years:
/// `<Idle|MPos:3.000,3.000,0.000|FS:0,0>` and
/// `<Idle,MPos:0.000,0.000,0.000>`; a bare `<Idle>` also parses.
pub fn status_state(line: &str) -> Option<&str> {
    let trimmed = line.trim_end();
    let inner = trimmed.strip_prefix('<')?.strip_suffix('>')?;
    let state = inner.split(['|', ',']).next()?.trim();
    if state.is_empty() || !state.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(state)
}
