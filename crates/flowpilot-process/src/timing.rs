//! Timing rules and the pure resolver mapping them to absolute instants.

use chrono::{DateTime, Duration, Utc};
use flowpilot_core::{FlowError, Result};
use serde::{Deserialize, Serialize};

/// Offset unit for fixed and relative delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Hours,
    Days,
}

impl DelayUnit {
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Hours => 3600,
            Self::Days => 86400,
        }
    }
}

/// The three preset offsets offered by the stage editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresetDelay {
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
}

impl PresetDelay {
    pub fn duration(&self) -> Duration {
        match self {
            Self::TwelveHours => Duration::hours(12),
            Self::OneDay => Duration::hours(24),
            Self::ThreeDays => Duration::hours(72),
        }
    }
}

/// Which neighbor a relative rule anchors to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    AfterPrevious,
    BeforeNext,
}

/// When a stage's action fires, relative to stage entry or a neighbor stage.
/// Pure data — only the resolver interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingRule {
    Immediate,
    Preset {
        preset: PresetDelay,
    },
    Fixed {
        amount: u32,
        unit: DelayUnit,
    },
    Relative {
        direction: Direction,
        amount: u32,
        unit: DelayUnit,
    },
}

impl TimingRule {
    /// Lenient loader for stored stage JSON: an unrecognized or malformed
    /// rule decodes as the one-day preset instead of erroring.
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(Self::Preset {
            preset: PresetDelay::OneDay,
        })
    }

    /// Offset carried by the rule itself (zero for `Immediate`).
    pub fn offset(&self) -> Duration {
        match self {
            Self::Immediate => Duration::zero(),
            Self::Preset { preset } => preset.duration(),
            Self::Fixed { amount, unit } | Self::Relative { amount, unit, .. } => {
                Duration::seconds(*amount as i64 * unit.seconds())
            }
        }
    }

    /// Edit-time check: delay amounts must be positive.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Fixed { amount, .. } | Self::Relative { amount, .. } if *amount == 0 => Err(
                FlowError::validation("delay amount must be a positive integer"),
            ),
            _ => Ok(()),
        }
    }
}

/// Resolve a timing rule to an absolute trigger instant.
///
/// `reference` is the current stage's entry instant. `neighbor` is the
/// previous stage's trigger instant for `after_previous`, or the next
/// stage's resolved instant for `before_next` (required there; the
/// definition validator rejects sequences where it cannot be computed).
///
/// Referentially transparent: same inputs, same instant, no side effects.
pub fn resolve(
    rule: &TimingRule,
    reference: DateTime<Utc>,
    neighbor: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>> {
    match rule {
        TimingRule::Immediate => Ok(reference),
        TimingRule::Preset { .. } | TimingRule::Fixed { .. } => Ok(reference + rule.offset()),
        TimingRule::Relative { direction, .. } => match direction {
            Direction::AfterPrevious => {
                // Missing neighbor: the first resolvable anchor is stage entry.
                Ok(neighbor.unwrap_or(reference) + rule.offset())
            }
            Direction::BeforeNext => {
                let next = neighbor.ok_or_else(|| {
                    FlowError::validation("before_next requires the next stage's instant")
                })?;
                // Back-dating never lands before the current stage's entry.
                Ok((next - rule.offset()).max(reference))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_immediate_is_identity() {
        assert_eq!(resolve(&TimingRule::Immediate, t0(), None).unwrap(), t0());
    }

    #[test]
    fn test_presets() {
        for (preset, hours) in [
            (PresetDelay::TwelveHours, 12),
            (PresetDelay::OneDay, 24),
            (PresetDelay::ThreeDays, 72),
        ] {
            let rule = TimingRule::Preset { preset };
            assert_eq!(
                resolve(&rule, t0(), None).unwrap(),
                t0() + Duration::hours(hours)
            );
        }
    }

    #[test]
    fn test_fixed_delay_units() {
        let rule = TimingRule::Fixed { amount: 5, unit: DelayUnit::Hours };
        assert_eq!(resolve(&rule, t0(), None).unwrap(), t0() + Duration::hours(5));

        let rule = TimingRule::Fixed { amount: 2, unit: DelayUnit::Days };
        assert_eq!(resolve(&rule, t0(), None).unwrap(), t0() + Duration::days(2));
    }

    #[test]
    fn test_after_previous_offsets_neighbor() {
        // resolve(after_previous 2h, neighbor=prev) == prev + 7200s
        let prev = t0();
        let rule = TimingRule::Relative {
            direction: Direction::AfterPrevious,
            amount: 2,
            unit: DelayUnit::Hours,
        };
        let resolved = resolve(&rule, t0(), Some(prev)).unwrap();
        assert_eq!(resolved, prev + Duration::seconds(7200));
    }

    #[test]
    fn test_after_previous_without_neighbor_uses_reference() {
        let rule = TimingRule::Relative {
            direction: Direction::AfterPrevious,
            amount: 1,
            unit: DelayUnit::Days,
        };
        assert_eq!(resolve(&rule, t0(), None).unwrap(), t0() + Duration::days(1));
    }

    #[test]
    fn test_before_next_back_dates() {
        let next = t0() + Duration::days(3);
        let rule = TimingRule::Relative {
            direction: Direction::BeforeNext,
            amount: 6,
            unit: DelayUnit::Hours,
        };
        assert_eq!(
            resolve(&rule, t0(), Some(next)).unwrap(),
            next - Duration::hours(6)
        );
    }

    #[test]
    fn test_before_next_clamped_to_entry() {
        // Back-dating past the entry instant clamps to entry.
        let next = t0() + Duration::hours(2);
        let rule = TimingRule::Relative {
            direction: Direction::BeforeNext,
            amount: 3,
            unit: DelayUnit::Days,
        };
        assert_eq!(resolve(&rule, t0(), Some(next)).unwrap(), t0());
    }

    #[test]
    fn test_before_next_requires_neighbor() {
        let rule = TimingRule::Relative {
            direction: Direction::BeforeNext,
            amount: 1,
            unit: DelayUnit::Hours,
        };
        assert!(resolve(&rule, t0(), None).is_err());
    }

    #[test]
    fn test_never_before_reference() {
        // resolve(r, t) >= t for every rule shape with a future neighbor.
        let rules = [
            TimingRule::Immediate,
            TimingRule::Preset { preset: PresetDelay::TwelveHours },
            TimingRule::Fixed { amount: 3, unit: DelayUnit::Days },
            TimingRule::Relative {
                direction: Direction::AfterPrevious,
                amount: 1,
                unit: DelayUnit::Hours,
            },
            TimingRule::Relative {
                direction: Direction::BeforeNext,
                amount: 10,
                unit: DelayUnit::Days,
            },
        ];
        let neighbor = Some(t0() + Duration::days(1));
        for rule in &rules {
            assert!(resolve(rule, t0(), neighbor).unwrap() >= t0(), "rule: {rule:?}");
        }
    }

    #[test]
    fn test_zero_amount_rejected_at_edit_time() {
        let rule = TimingRule::Fixed { amount: 0, unit: DelayUnit::Hours };
        assert!(rule.validate().is_err());
        assert!(TimingRule::Immediate.validate().is_ok());
    }

    #[test]
    fn test_lenient_fallback_for_unknown_kind() {
        let rule = TimingRule::from_value(&json!({"kind": "lunar_phase", "amount": 1}));
        assert_eq!(rule, TimingRule::Preset { preset: PresetDelay::OneDay });
    }

    #[test]
    fn test_serde_tags() {
        let rule = TimingRule::Relative {
            direction: Direction::BeforeNext,
            amount: 4,
            unit: DelayUnit::Hours,
        };
        let v = serde_json::to_value(&rule).unwrap();
        assert_eq!(v["kind"], "relative");
        assert_eq!(v["direction"], "before_next");
        assert_eq!(TimingRule::from_value(&v), rule);

        let preset = serde_json::to_value(TimingRule::Preset { preset: PresetDelay::ThreeDays })
            .unwrap();
        assert_eq!(preset["preset"], "3d");
    }
}
