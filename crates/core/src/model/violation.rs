use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── CHANNELS ──────────────────────────────────────────────────────────────────
//

/// An independently tracked category of integrity violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViolationChannel {
    #[serde(rename = "visual-no-subject")]
    VisualNoSubject,
    #[serde(rename = "visual-prohibited-object")]
    VisualProhibitedObject,
    #[serde(rename = "tab-switch")]
    TabSwitch,
    #[serde(rename = "clipboard-attempt")]
    ClipboardAttempt,
}

impl ViolationChannel {
    pub const ALL: [ViolationChannel; 4] = [
        ViolationChannel::VisualNoSubject,
        ViolationChannel::VisualProhibitedObject,
        ViolationChannel::TabSwitch,
        ViolationChannel::ClipboardAttempt,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VisualNoSubject => "visual-no-subject",
            Self::VisualProhibitedObject => "visual-prohibited-object",
            Self::TabSwitch => "tab-switch",
            Self::ClipboardAttempt => "clipboard-attempt",
        }
    }

    /// Notice shown to the learner when a single violation is recorded.
    #[must_use]
    pub fn warning_reason(self) -> &'static str {
        match self {
            Self::VisualNoSubject => "student not present in front of camera",
            Self::VisualProhibitedObject => "mobile phone detected",
            Self::TabSwitch => "tab switched or window minimized",
            Self::ClipboardAttempt => "copy, paste and context menu are disabled during the test",
        }
    }

    /// Reason attached to a forced submission once the channel breaches.
    #[must_use]
    pub fn escalation_reason(self) -> &'static str {
        match self {
            Self::VisualNoSubject => "student not present in front of camera multiple times",
            Self::VisualProhibitedObject => "mobile phone detected multiple times",
            Self::TabSwitch => "tab switched or window minimized multiple times",
            Self::ClipboardAttempt => "clipboard or context menu used multiple times",
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::VisualNoSubject => 0,
            Self::VisualProhibitedObject => 1,
            Self::TabSwitch => 2,
            Self::ClipboardAttempt => 3,
        }
    }
}

impl fmt::Display for ViolationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown violation channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for ViolationChannel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

//
// ─── POLICY ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EscalationPolicyError {
    #[error("threshold for {0} must be > 0")]
    ZeroThreshold(ViolationChannel),
}

/// Per-channel thresholds. Channels are never summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    thresholds: [u32; 4],
}

impl EscalationPolicy {
    pub const DEFAULT_THRESHOLD: u32 = 3;

    /// Same threshold on every channel.
    ///
    /// # Errors
    ///
    /// Returns `EscalationPolicyError::ZeroThreshold` if `threshold` is zero.
    pub fn uniform(threshold: u32) -> Result<Self, EscalationPolicyError> {
        if threshold == 0 {
            return Err(EscalationPolicyError::ZeroThreshold(
                ViolationChannel::VisualNoSubject,
            ));
        }
        Ok(Self {
            thresholds: [threshold; 4],
        })
    }

    /// Override one channel's threshold.
    ///
    /// # Errors
    ///
    /// Returns `EscalationPolicyError::ZeroThreshold` if `threshold` is zero.
    pub fn with_threshold(
        mut self,
        channel: ViolationChannel,
        threshold: u32,
    ) -> Result<Self, EscalationPolicyError> {
        if threshold == 0 {
            return Err(EscalationPolicyError::ZeroThreshold(channel));
        }
        self.thresholds[channel.slot()] = threshold;
        Ok(self)
    }

    #[must_use]
    pub fn threshold(&self, channel: ViolationChannel) -> u32 {
        self.thresholds[channel.slot()]
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            thresholds: [Self::DEFAULT_THRESHOLD; 4],
        }
    }
}

//
// ─── LEDGER ────────────────────────────────────────────────────────────────────
//

/// Decision returned for every recorded violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Below threshold: surface a notice and carry on.
    Warn {
        channel: ViolationChannel,
        count: u32,
        threshold: u32,
    },
    /// The channel reached its threshold: force submission.
    AutoSubmit {
        channel: ViolationChannel,
        count: u32,
    },
}

impl Escalation {
    #[must_use]
    pub fn channel(&self) -> ViolationChannel {
        match self {
            Self::Warn { channel, .. } | Self::AutoSubmit { channel, .. } => *channel,
        }
    }

    #[must_use]
    pub fn is_auto_submit(&self) -> bool {
        matches!(self, Self::AutoSubmit { .. })
    }
}

/// Point-in-time copy of the per-channel counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationCounts {
    counts: [u32; 4],
}

impl ViolationCounts {
    #[must_use]
    pub fn get(&self, channel: ViolationChannel) -> u32 {
        self.counts[channel.slot()]
    }

    /// Iterate `(channel, count)` pairs in channel order.
    pub fn iter(&self) -> impl Iterator<Item = (ViolationChannel, u32)> + '_ {
        ViolationChannel::ALL
            .into_iter()
            .map(|channel| (channel, self.get(channel)))
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.counts.iter().all(|c| *c == 0)
    }
}

/// Per-session violation counts and the policy applied to them.
///
/// Counts only ever grow; a new ledger is the only way to reset them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationLedger {
    policy: EscalationPolicy,
    counts: ViolationCounts,
}

impl ViolationLedger {
    #[must_use]
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            counts: ViolationCounts::default(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    #[must_use]
    pub fn counts(&self) -> ViolationCounts {
        self.counts
    }

    #[must_use]
    pub fn count(&self, channel: ViolationChannel) -> u32 {
        self.counts.get(channel)
    }

    /// Increment `channel` and decide whether to escalate.
    pub fn record(&mut self, channel: ViolationChannel) -> Escalation {
        let slot = &mut self.counts.counts[channel.slot()];
        *slot = slot.saturating_add(1);
        let count = *slot;
        let threshold = self.policy.threshold(channel);

        if count >= threshold {
            Escalation::AutoSubmit { channel, count }
        } else {
            Escalation::Warn {
                channel,
                count,
                threshold,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_round_trip_through_from_str() {
        for channel in ViolationChannel::ALL {
            assert_eq!(channel.as_str().parse::<ViolationChannel>(), Ok(channel));
        }
        assert!("keyboard".parse::<ViolationChannel>().is_err());
    }

    #[test]
    fn escalates_on_reaching_threshold() {
        let mut ledger = ViolationLedger::new(EscalationPolicy::default());
        let channel = ViolationChannel::VisualProhibitedObject;

        assert!(matches!(ledger.record(channel), Escalation::Warn { count: 1, threshold: 3, .. }));
        assert!(matches!(ledger.record(channel), Escalation::Warn { count: 2, .. }));
        assert_eq!(
            ledger.record(channel),
            Escalation::AutoSubmit { channel, count: 3 }
        );
        // Past the threshold every further violation still escalates.
        assert!(ledger.record(channel).is_auto_submit());
        assert_eq!(ledger.count(channel), 4);
    }

    #[test]
    fn channels_are_never_summed() {
        let mut ledger = ViolationLedger::new(EscalationPolicy::default());
        for channel in [
            ViolationChannel::VisualNoSubject,
            ViolationChannel::TabSwitch,
            ViolationChannel::ClipboardAttempt,
        ] {
            assert!(!ledger.record(channel).is_auto_submit());
        }
        for channel in [ViolationChannel::TabSwitch, ViolationChannel::ClipboardAttempt] {
            assert!(!ledger.record(channel).is_auto_submit());
        }
        assert_eq!(ledger.count(ViolationChannel::TabSwitch), 2);
        assert_eq!(ledger.count(ViolationChannel::VisualProhibitedObject), 0);
    }

    #[test]
    fn per_channel_threshold_override() {
        let policy = EscalationPolicy::default()
            .with_threshold(ViolationChannel::TabSwitch, 1)
            .unwrap();
        let mut ledger = ViolationLedger::new(policy);
        assert!(ledger.record(ViolationChannel::TabSwitch).is_auto_submit());
        assert!(!ledger.record(ViolationChannel::ClipboardAttempt).is_auto_submit());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        assert_eq!(
            EscalationPolicy::default().with_threshold(ViolationChannel::TabSwitch, 0),
            Err(EscalationPolicyError::ZeroThreshold(ViolationChannel::TabSwitch))
        );
        assert!(EscalationPolicy::uniform(0).is_err());
    }

    #[test]
    fn counts_snapshot_lists_every_channel() {
        let mut ledger = ViolationLedger::new(EscalationPolicy::default());
        ledger.record(ViolationChannel::TabSwitch);
        let counts = ledger.counts();
        assert!(!counts.is_clean());
        let listed: Vec<_> = counts.iter().collect();
        assert_eq!(listed.len(), 4);
        assert_eq!(listed[2], (ViolationChannel::TabSwitch, 1));
    }
}
