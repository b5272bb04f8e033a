use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Best-effort completion percentage scraped from the tool's own output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressEstimate(u8);

impl ProgressEstimate {
    pub const COMPLETE: ProgressEstimate = ProgressEstimate(100);

    /// Returns `None` for values above 100.
    pub fn new(percent: u8) -> Option<Self> {
        (percent <= 100).then_some(Self(percent))
    }

    pub fn percent(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ProgressEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Strategy for pulling a progress value out of one relayed output line.
///
/// The external tool's progress rendering is not a stable interface, so
/// parsers are swappable on [`crate::OutputRelay`].
pub trait ProgressParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<ProgressEstimate>;
}

impl<F> ProgressParser for F
where
    F: Fn(&str) -> Option<ProgressEstimate> + Send + Sync,
{
    fn parse(&self, line: &str) -> Option<ProgressEstimate> {
        self(line)
    }
}

/// Parser for tqdm-style bars (`" 42%|####  | 42.0/100.0 [..]"`) with a
/// fallback to the first bare `NN%` in the line.
pub struct PercentProgressParser {
    bar: Regex,
    percent: Regex,
}

impl PercentProgressParser {
    pub fn new() -> Self {
        Self {
            bar: Regex::new(r"(\d{1,3})%\|[^|]*\|\s*(\d+(?:\.\d+)?)/(\d+(?:\.\d+)?)")
                .expect("progress bar pattern is valid"),
            // A number must start the line or follow a non-digit, non-dot byte
            percent: Regex::new(r"(?:^|[^\d.])(\d{1,3})(?:\.\d+)?\s?%")
                .expect("percent pattern is valid"),
        }
    }

    fn parse_bar(&self, line: &str) -> Option<ProgressEstimate> {
        let captures = self.bar.captures(line)?;

        let done: f64 = captures[2].parse().ok()?;
        let total: f64 = captures[3].parse().ok()?;
        if total > 0.0 && done <= total {
            let percent = (done * 100.0 / total).floor();
            return ProgressEstimate::new(percent as u8);
        }

        captures[1].parse().ok().and_then(ProgressEstimate::new)
    }

    fn parse_percent(&self, line: &str) -> Option<ProgressEstimate> {
        self.percent
            .captures_iter(line)
            .filter_map(|captures| captures[1].parse::<u8>().ok())
            .find_map(ProgressEstimate::new)
    }
}

impl Default for PercentProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser for PercentProgressParser {
    fn parse(&self, line: &str) -> Option<ProgressEstimate> {
        self.parse_bar(line).or_else(|| self.parse_percent(line))
    }
}
