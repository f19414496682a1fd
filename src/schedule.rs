//! Report-schedule parsing and evaluation
//!
//! A schedule is a string of semicolon-separated repeating reports, each
//! `DESTS,INTERVAL[,OFFSET]`. Every item becomes an independent slot with
//! its own outlet string, interval and next-fire time. A slot with a
//! non-zero offset first fires at `t0 + offset`, otherwise at
//! `t0 + interval`; after firing it advances in whole intervals past the
//! current time, so a stalled reporter catches up without drifting phase.

use crate::error::{Error, Result};

#[derive(Debug)]
struct Slot {
    outlets: String,
    interval_us: u64,
    next_fire_us: u64,
}

/// Parsed schedule: one slot per repeating report
#[derive(Debug)]
pub(crate) struct ReportSchedule {
    slots: Vec<Slot>,
}

impl ReportSchedule {
    /// Parse a schedule string. `timezero_us` anchors every slot's first
    /// fire time.
    pub fn parse(spec: &str, timezero_us: u64) -> Result<Self> {
        let mut slots = Vec::new();
        for item in spec.split(';') {
            let mut fields = item.split(',');
            let outlets = fields.next().unwrap_or("").to_string();
            let interval_secs: f64 = fields
                .next()
                .ok_or_else(|| Error::Config(format!("schedule item '{item}' has no interval")))?
                .parse()
                .map_err(|_| Error::Config(format!("bad interval in schedule item '{item}'")))?;
            if !(interval_secs > 0.0) {
                return Err(Error::Config(format!(
                    "schedule interval must be positive in '{item}'"
                )));
            }
            let interval_us = (interval_secs * 1e6) as u64;
            let mut next_fire_us = timezero_us + interval_us;

            if let Some(offset_field) = fields.next() {
                let offset_secs: f64 = offset_field
                    .parse()
                    .map_err(|_| Error::Config(format!("bad offset in schedule item '{item}'")))?;
                // A zero offset means "no offset": first fire after one
                // full interval.
                if offset_secs != 0.0 {
                    if offset_secs < 0.0 {
                        return Err(Error::Config(format!(
                            "schedule offset must be non-negative in '{item}'"
                        )));
                    }
                    next_fire_us = timezero_us + (offset_secs * 1e6) as u64;
                }
            }
            if fields.next().is_some() {
                return Err(Error::Config(format!(
                    "schedule item '{item}' has too many fields"
                )));
            }

            slots.push(Slot { outlets, interval_us, next_fire_us });
        }
        Ok(ReportSchedule { slots })
    }

    /// Number of slots
    pub fn parallelism(&self) -> usize {
        self.slots.len()
    }

    /// Returns the slot's outlet string when it is due at `now_us`
    pub fn outlets(&self, slot: usize, now_us: u64) -> Option<&str> {
        let s = &self.slots[slot];
        (now_us >= s.next_fire_us).then_some(s.outlets.as_str())
    }

    /// Advance the slot past `now_us` by whole intervals
    pub fn reset(&mut self, slot: usize, now_us: u64) {
        let s = &mut self.slots[slot];
        let behind = now_us.saturating_sub(s.next_fire_us) as f64;
        let steps = (behind / s.interval_us as f64).ceil() as u64;
        s.next_fire_us += s.interval_us * steps;
    }

    /// Measurement duration covered by one report from this slot
    pub fn duration_us(&self, slot: usize) -> u64 {
        self.slots.get(slot).map_or(0, |s| s.interval_us)
    }
}
