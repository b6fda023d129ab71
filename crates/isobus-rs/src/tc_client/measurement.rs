// crates/isobus-rs/src/tc_client/measurement.rs
//! Measurement commands the TC set up for individual process variables
//! (Reference: ISO 11783-10, Section B.3 to B.7).

use crate::ddop::TriggerMethods;
use crate::process_data::ProcessDataCommand;
use alloc::vec::Vec;

/// Threshold-based triggers are evaluated at most this often.
pub const SAMPLE_INTERVAL_US: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementTrigger {
    /// Report every `interval_ms` milliseconds.
    TimeInterval { interval_ms: u32 },
    /// Report every `interval_mm` millimetres travelled.
    DistanceInterval { interval_mm: u32 },
    /// Report while the value is above the threshold.
    MinimumWithinThreshold(i32),
    /// Report while the value is below the threshold.
    MaximumWithinThreshold(i32),
    /// Report when the value moved by at least the threshold.
    ChangeThreshold(i32),
}

impl MeasurementTrigger {
    /// Maps a measurement command and its value to a trigger.
    /// Returns `None` for commands that are not measurement commands.
    pub fn from_command(command: ProcessDataCommand, value: i32) -> Option<Self> {
        match command {
            ProcessDataCommand::MeasurementTimeInterval => Some(Self::TimeInterval {
                interval_ms: value.max(0) as u32,
            }),
            ProcessDataCommand::MeasurementDistanceInterval => Some(Self::DistanceInterval {
                interval_mm: value.max(0) as u32,
            }),
            ProcessDataCommand::MeasurementMinimumWithinThreshold => Some(Self::MinimumWithinThreshold(value)),
            ProcessDataCommand::MeasurementMaximumWithinThreshold => Some(Self::MaximumWithinThreshold(value)),
            ProcessDataCommand::MeasurementChangeThreshold => Some(Self::ChangeThreshold(value)),
            _ => None,
        }
    }

    /// The DPD trigger method the TC must have seen to use this trigger.
    pub fn trigger_method(&self) -> TriggerMethods {
        match self {
            Self::TimeInterval { .. } => TriggerMethods::TIME_INTERVAL,
            Self::DistanceInterval { .. } => TriggerMethods::DISTANCE_INTERVAL,
            Self::MinimumWithinThreshold(_) | Self::MaximumWithinThreshold(_) => TriggerMethods::THRESHOLD_LIMITS,
            Self::ChangeThreshold(_) => TriggerMethods::ON_CHANGE,
        }
    }

    fn same_kind(&self, other: &Self) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }

    /// A zero interval switches time and distance reporting off.
    fn is_cancel(&self) -> bool {
        matches!(
            self,
            Self::TimeInterval { interval_ms: 0 } | Self::DistanceInterval { interval_mm: 0 }
        )
    }
}

#[derive(Debug, Clone)]
struct Measurement {
    element_number: u16,
    ddi: u16,
    trigger: MeasurementTrigger,
    last_sent: Option<i32>,
    next_due_us: u64,
    distance_mark_mm: u64,
}

/// Active measurement commands of one client session.
#[derive(Debug, Default)]
pub struct MeasurementCommands {
    entries: Vec<Measurement>,
    last_sample_us: Option<u64>,
}

impl MeasurementCommands {
    /// Installs or replaces the trigger of the same kind for `element_number`/`ddi`.
    pub fn set(&mut self, element_number: u16, ddi: u16, trigger: MeasurementTrigger, now_us: u64, distance_mm: u64) {
        self.entries.retain(|m| {
            !(m.element_number == element_number && m.ddi == ddi && m.trigger.same_kind(&trigger))
        });
        if trigger.is_cancel() {
            return;
        }
        self.entries.push(Measurement {
            element_number,
            ddi,
            trigger,
            last_sent: None,
            next_due_us: now_us,
            distance_mark_mm: distance_mm,
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_sample_us = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the `(element, DDI, value)` triples due now. `sample` supplies
    /// the current value of a variable, `None` if it is unavailable.
    pub fn service<F>(&mut self, now_us: u64, distance_mm: u64, mut sample: F) -> Vec<(u16, u16, i32)>
    where
        F: FnMut(u16, u16) -> Option<i32>,
    {
        let sample_thresholds = self
            .last_sample_us
            .is_none_or(|last| now_us.saturating_sub(last) >= SAMPLE_INTERVAL_US);
        if sample_thresholds {
            self.last_sample_us = Some(now_us);
        }

        let mut due = Vec::new();
        for m in &mut self.entries {
            let value = match m.trigger {
                MeasurementTrigger::TimeInterval { interval_ms } => {
                    if now_us < m.next_due_us {
                        continue;
                    }
                    m.next_due_us = now_us + u64::from(interval_ms) * 1_000;
                    sample(m.element_number, m.ddi)
                }
                MeasurementTrigger::DistanceInterval { interval_mm } => {
                    if distance_mm.saturating_sub(m.distance_mark_mm) < u64::from(interval_mm) {
                        continue;
                    }
                    m.distance_mark_mm = distance_mm;
                    sample(m.element_number, m.ddi)
                }
                MeasurementTrigger::MinimumWithinThreshold(threshold) if sample_thresholds => {
                    sample(m.element_number, m.ddi)
                        .filter(|v| *v > threshold && m.last_sent != Some(*v))
                }
                MeasurementTrigger::MaximumWithinThreshold(threshold) if sample_thresholds => {
                    sample(m.element_number, m.ddi)
                        .filter(|v| *v < threshold && m.last_sent != Some(*v))
                }
                MeasurementTrigger::ChangeThreshold(threshold) if sample_thresholds => {
                    sample(m.element_number, m.ddi).filter(|v| match m.last_sent {
                        None => true,
                        Some(last) => (i64::from(*v) - i64::from(last)).abs() >= i64::from(threshold.max(1)),
                    })
                }
                _ => None,
            };
            if let Some(value) = value {
                m.last_sent = Some(value);
                due.push((m.element_number, m.ddi, value));
            }
        }
        due
    }
}
