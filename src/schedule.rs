//! Weekly schedule evaluation
//!
//! A schedule is 42 bytes: six 4-hour blocks for each of seven weekdays
//! (Sunday first). Each byte holds eight half-hour slots, most significant
//! bit first. Schedules travel as 56 characters of standard base64.

use crate::error::{Result, TrolleyError};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Bytes in an unpacked schedule
pub const SCHEDULE_BYTES: usize = 42;

/// Characters in a packed schedule
pub const PACKED_LEN: usize = 56;

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Weekly on/off bitmask at half-hour resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleBitmask([u8; SCHEDULE_BYTES]);

/// Location of one half-hour slot inside the bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotIndex {
    /// Byte index: 6 * weekday (Sunday = 0) + hour / 4
    pub block: usize,
    /// Bit offset inside the byte, 7 for the first half hour of the block
    pub bit: u8,
}

impl SlotIndex {
    pub fn at(now: &NaiveDateTime) -> Self {
        let weekday = now.weekday().num_days_from_sunday() as usize;
        let hour = now.hour();
        let second_half = u32::from(now.minute() > 29);
        Self {
            block: 6 * weekday + (hour / 4) as usize,
            bit: (7 - (2 * (hour % 4) + second_half)) as u8,
        }
    }

    /// Key used to detect a change of half-hour period
    fn period_key(self) -> u32 {
        (self.block as u32 + 1) * (u32::from(self.bit) + 1)
    }
}

impl Default for ScheduleBitmask {
    fn default() -> Self {
        Self([0; SCHEDULE_BYTES])
    }
}

impl ScheduleBitmask {
    pub fn from_bytes(bytes: [u8; SCHEDULE_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SCHEDULE_BYTES] {
        &self.0
    }

    /// Decode a 56-character packed schedule
    pub fn unpack(packed: &str) -> Result<Self> {
        let chars = packed.as_bytes();
        if chars.len() != PACKED_LEN {
            return Err(TrolleyError::schedule(format!(
                "Packed schedule must be {} characters, got {}",
                PACKED_LEN,
                chars.len()
            )));
        }

        let mut bytes = [0u8; SCHEDULE_BYTES];
        for (quad, out) in chars.chunks_exact(4).zip(bytes.chunks_exact_mut(3)) {
            let mut v = [0u8; 4];
            for (slot, c) in v.iter_mut().zip(quad) {
                *slot = decode_char(*c)?;
            }
            out[0] = (v[0] << 2) | ((v[1] & 0x30) >> 4);
            out[1] = ((v[1] & 0x0f) << 4) | ((v[2] & 0x3c) >> 2);
            out[2] = ((v[2] & 0x03) << 6) | (v[3] & 0x3f);
        }
        Ok(Self(bytes))
    }

    /// Encode to the 56-character packed form
    pub fn pack(&self) -> String {
        let mut out = String::with_capacity(PACKED_LEN);
        for b in self.0.chunks_exact(3) {
            let idx = [
                b[0] >> 2,
                ((b[0] & 0x03) << 4) | (b[1] >> 4),
                ((b[1] & 0x0f) << 2) | (b[2] >> 6),
                b[2] & 0x3f,
            ];
            for i in idx {
                out.push(char::from(BASE64_ALPHABET[usize::from(i)]));
            }
        }
        out
    }

    /// A schedule with no slot set
    pub fn is_none(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn is_on(&self, slot: SlotIndex) -> bool {
        self.0
            .get(slot.block)
            .is_some_and(|byte| (byte >> slot.bit) & 0x01 == 0x01)
    }

    pub fn set(&mut self, slot: SlotIndex, on: bool) {
        if let Some(byte) = self.0.get_mut(slot.block) {
            if on {
                *byte |= 1 << slot.bit;
            } else {
                *byte &= !(1 << slot.bit);
            }
        }
    }
}

fn decode_char(c: u8) -> Result<u8> {
    BASE64_ALPHABET
        .iter()
        .position(|a| *a == c)
        .map(|p| p as u8)
        .ok_or_else(|| {
            TrolleyError::schedule(format!("Invalid schedule character {:?}", char::from(c)))
        })
}

impl Serialize for ScheduleBitmask {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pack())
    }
}

impl<'de> Deserialize<'de> for ScheduleBitmask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let packed = String::deserialize(deserializer)?;
        ScheduleBitmask::unpack(&packed).map_err(serde::de::Error::custom)
    }
}

/// Parse a DD/MM/YYYY validity date
pub fn parse_valid_until(text: &str) -> Result<NaiveDate> {
    if text.len() != 10 {
        return Err(TrolleyError::schedule("Validity date must be DD/MM/YYYY"));
    }
    Ok(NaiveDate::parse_from_str(text, "%d/%m/%Y")?)
}

/// Whether the schedule has passed its validity date
///
/// The validity day itself is still in date. An unknown clock counts as
/// expired.
pub fn has_expired(now: Option<&NaiveDateTime>, valid_until: NaiveDate) -> bool {
    match now {
        Some(now) => now.date() > valid_until,
        None => true,
    }
}

/// Result of evaluating a schedule at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDecision {
    pub is_on: bool,
    pub expired: bool,
    /// Slot consulted, absent when the clock is invalid
    pub slot: Option<SlotIndex>,
}

pub fn evaluate(
    now: Option<&NaiveDateTime>,
    bitmask: &ScheduleBitmask,
    valid_until: NaiveDate,
) -> ScheduleDecision {
    let expired = has_expired(now, valid_until);
    let slot = now.map(SlotIndex::at);
    let is_on = !expired && slot.is_some_and(|s| bitmask.is_on(s));
    ScheduleDecision {
        is_on,
        expired,
        slot,
    }
}

/// Tracks whether a smart start was already tried in the current half hour
#[derive(Debug, Clone, Default)]
pub struct PeriodTracker {
    last_key: u32,
    schedule_changed: bool,
    ended_this_period: bool,
}

impl PeriodTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new smart schedule was loaded
    pub fn mark_schedule_changed(&mut self) {
        self.schedule_changed = true;
        self.ended_this_period = false;
    }

    /// A smart charge finished inside the period holding `slot`
    pub fn mark_ended(&mut self, slot: SlotIndex) {
        self.last_key = slot.period_key();
        self.ended_this_period = true;
    }

    pub fn ended_this_period(&self) -> bool {
        self.ended_this_period
    }

    /// Returns `false` when the schedule or the half-hour period changed since
    /// the last call, `true` when still inside the same period.
    pub fn same_period(&mut self, slot: SlotIndex) -> bool {
        let key = slot.period_key();
        if self.schedule_changed {
            self.last_key = key;
            self.schedule_changed = false;
            self.ended_this_period = false;
            false
        } else if key != self.last_key {
            self.last_key = key;
            self.ended_this_period = false;
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_slot_index() {
        // 2024-01-01 is a Monday
        let slot = SlotIndex::at(&at(2024, 1, 1, 8, 10));
        assert_eq!(slot, SlotIndex { block: 8, bit: 7 });
        let slot = SlotIndex::at(&at(2024, 1, 1, 11, 45));
        assert_eq!(slot, SlotIndex { block: 8, bit: 0 });
        // Sunday midnight is the very first slot
        let slot = SlotIndex::at(&at(2023, 12, 31, 0, 0));
        assert_eq!(slot, SlotIndex { block: 0, bit: 7 });
    }

    #[test]
    fn test_unpack_rejects_bad_input() {
        assert!(ScheduleBitmask::unpack("AAAA").is_err());
        let mut bad = "A".repeat(55);
        bad.push('*');
        assert!(ScheduleBitmask::unpack(&bad).is_err());
    }

    #[test]
    fn test_empty_schedule_is_none() {
        let s = ScheduleBitmask::unpack(&"A".repeat(PACKED_LEN)).unwrap();
        assert!(s.is_none());
        let s = ScheduleBitmask::unpack(&"/".repeat(PACKED_LEN)).unwrap();
        assert!(!s.is_none());
        assert!(s.as_bytes().iter().all(|b| *b == 0xff));
    }

    #[test]
    fn test_pack_matches_known_encoding() {
        let mut bytes = [0u8; SCHEDULE_BYTES];
        bytes[0] = 0x80;
        let s = ScheduleBitmask::from_bytes(bytes);
        let packed = s.pack();
        assert!(packed.starts_with("gAAA"));
        assert_eq!(ScheduleBitmask::unpack(&packed).unwrap(), s);
    }

    #[test]
    fn test_expiry_boundaries() {
        let until = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert!(!has_expired(Some(&at(2024, 6, 15, 23, 59)), until));
        assert!(has_expired(Some(&at(2024, 6, 16, 0, 0)), until));
        assert!(has_expired(Some(&at(2025, 1, 1, 0, 0)), until));
        assert!(!has_expired(Some(&at(2023, 12, 31, 0, 0)), until));
        assert!(has_expired(None, until));
    }

    #[test]
    fn test_parse_valid_until() {
        assert_eq!(
            parse_valid_until("31/12/2025").unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()
        );
        assert!(parse_valid_until("31/02/2025").is_err());
        assert!(parse_valid_until("1/1/2025").is_err());
    }

    #[test]
    fn test_evaluate_follows_monday_morning_slot() {
        let mut schedule = ScheduleBitmask::default();
        schedule.set(SlotIndex::at(&at(2024, 1, 1, 8, 0)), true);
        let until = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();

        let on = evaluate(Some(&at(2024, 1, 1, 8, 10)), &schedule, until);
        assert!(on.is_on);
        assert!(!on.expired);
        assert_eq!(on.slot, Some(SlotIndex { block: 8, bit: 7 }));

        assert!(!evaluate(Some(&at(2024, 1, 1, 8, 35)), &schedule, until).is_on);
        assert!(!evaluate(Some(&at(2024, 1, 1, 7, 59)), &schedule, until).is_on);
        // Same slot a week later
        assert!(evaluate(Some(&at(2024, 1, 8, 8, 29)), &schedule, until).is_on);

        let past = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let expired = evaluate(Some(&at(2024, 1, 1, 8, 10)), &schedule, past);
        assert!(expired.expired);
        assert!(!expired.is_on);

        let unknown = evaluate(None, &schedule, until);
        assert!(!unknown.is_on);
        assert_eq!(unknown.slot, None);
    }

    #[test]
    fn test_period_tracker() {
        let mut tracker = PeriodTracker::new();
        let a = SlotIndex { block: 8, bit: 7 };
        let b = SlotIndex { block: 8, bit: 6 };

        assert!(!tracker.same_period(a));
        assert!(tracker.same_period(a));
        tracker.mark_ended(a);
        assert!(tracker.same_period(a));
        assert!(!tracker.same_period(b));
        assert!(!tracker.ended_this_period());

        // A charge started in `b` that ends in `c` holds off `c` too
        let c = SlotIndex { block: 8, bit: 5 };
        tracker.mark_ended(c);
        assert!(tracker.ended_this_period());
        assert!(tracker.same_period(c));
        assert!(!tracker.same_period(b));

        tracker.mark_schedule_changed();
        assert!(!tracker.same_period(b));
        assert!(tracker.same_period(b));
    }
}
