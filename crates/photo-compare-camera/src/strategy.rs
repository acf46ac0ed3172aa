//! Acquisition strategies and the first-success combinator.

use std::fmt;
use std::future::Future;

use thiserror::Error;

use crate::{FacingMode, MediaError};

/// One way of asking the browser for a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionStrategy {
    /// `facingMode: { ideal }` plus resolution hints.
    IdealFacing,
    /// `facingMode: target` plus resolution hints. Some mobile browsers reject
    /// the `ideal` object form.
    PlainFacing,
    /// Enumerate devices, match the label, request that `deviceId`.
    DeviceLabel,
    /// `facingMode: target` and nothing else.
    BareFacing,
}

impl AcquisitionStrategy {
    /// Short name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            AcquisitionStrategy::IdealFacing => "ideal_facing",
            AcquisitionStrategy::PlainFacing => "plain_facing",
            AcquisitionStrategy::DeviceLabel => "device_label",
            AcquisitionStrategy::BareFacing => "bare_facing",
        }
    }
}

impl fmt::Display for AcquisitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Default chain order.
pub const DEFAULT_STRATEGY_CHAIN: [AcquisitionStrategy; 4] = [
    AcquisitionStrategy::IdealFacing,
    AcquisitionStrategy::PlainFacing,
    AcquisitionStrategy::DeviceLabel,
    AcquisitionStrategy::BareFacing,
];

/// Why one strategy did not produce a usable stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    /// The media call failed or timed out.
    #[error(transparent)]
    Media(#[from] MediaError),
    /// No enumerated camera label matched the target.
    #[error("no device label matches {0}")]
    NoMatchingDevice(FacingMode),
    /// A stream arrived but from the other physical camera.
    #[error("expected {expected} camera, got {actual}")]
    WrongCamera {
        /// Requested facing mode.
        expected: FacingMode,
        /// Facing mode reported by the track.
        actual: FacingMode,
    },
}

/// Record of one failed strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    /// Strategy that failed.
    pub strategy: AcquisitionStrategy,
    /// Failure cause.
    pub error: StrategyError,
}

/// Classifies a device label as rear or front camera.
///
/// Rear keywords win when a label carries both.
pub fn classify_label(label: &str) -> Option<FacingMode> {
    let label = label.to_ascii_lowercase();
    if ["back", "rear", "environment"]
        .iter()
        .any(|keyword| label.contains(keyword))
    {
        Some(FacingMode::Environment)
    } else if ["front", "face", "user"]
        .iter()
        .any(|keyword| label.contains(keyword))
    {
        Some(FacingMode::User)
    } else {
        None
    }
}

/// Runs `attempt` for each candidate in order and returns the first success.
///
/// Candidates after the winner are never attempted. When every candidate
/// fails, all failures are returned in order.
pub async fn first_success<I, T, E, F, Fut>(
    candidates: I,
    mut attempt: F,
) -> Result<T, Vec<(I::Item, E)>>
where
    I: IntoIterator,
    I::Item: Clone,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut failures = Vec::new();
    for candidate in candidates {
        match attempt(candidate.clone()).await {
            Ok(value) => return Ok(value),
            Err(error) => failures.push((candidate, error)),
        }
    }
    Err(failures)
}
