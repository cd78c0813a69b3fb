//! Broadcast Time subprotocol: clock generator and consumer, fixed-point
//! rate math, calendar rollover, and the query-reply sequencer (§4.10, §8
//! S7/S8).
//!
//! Event-id encoding adaptation: the specification gives suffix *ranges*
//! per field (time/date/year/rate) without saying how "set" and "report"
//! share a range that is too small to hold both independently. This module
//! resolves that the way Event Transport already resolves set-vs-query
//! elsewhere in this protocol: the suffix encodes only the field's value;
//! whether a message is a command ("set") or a report is carried by the
//! MTI (PC Event Report vs Producer/Consumer Identified), not by a suffix
//! bit. This uses the full suffix range for the value itself and avoids
//! inventing an extra flag bit the specification never assigns a position.

use crate::event::event_payload;
use crate::mti::Mti;
use openlcb_core::{EventId, NodeId};

/// 100 ms, the cadence at which a running consumer clock's accumulator
/// advances.
pub const TICK_MS: u32 = 100;

/// A fast-minute elapses once the accumulator reaches this many
/// thousandths of a real second: `4 * 60 * 1000`.
pub const FAST_MINUTE_THRESHOLD: u32 = 240_000;

/// Suffix base for Set-or-Report Time events (hour/minute).
pub const TIME_SUFFIX_BASE: u16 = 0x0000;
/// Suffix base for Set-or-Report Date events (month/day).
pub const DATE_SUFFIX_BASE: u16 = 0x2000;
/// Suffix base for Set-or-Report Year events.
pub const YEAR_SUFFIX_BASE: u16 = 0x3000;
/// Suffix base for Set-or-Report Rate events.
pub const RATE_SUFFIX_BASE: u16 = 0x4000;

/// Command event suffixes, single fixed values outside the field ranges.
pub const SUFFIX_START: u16 = 0x8000;
pub const SUFFIX_STOP: u16 = 0x8001;
pub const SUFFIX_DATE_ROLLOVER: u16 = 0x8002;
pub const SUFFIX_QUERY: u16 = 0x8003;

/// Encodes an hour/minute pair into a Set-or-Report Time suffix.
pub const fn time_suffix(hour: u8, minute: u8) -> u16 {
    TIME_SUFFIX_BASE | ((hour as u16 & 0x1F) << 6) | (minute as u16 & 0x3F)
}

/// Encodes a month/day pair into a Set-or-Report Date suffix.
pub const fn date_suffix(month: u8, day: u8) -> u16 {
    DATE_SUFFIX_BASE | ((month as u16 & 0x1F) << 5) | (day as u16 & 0x1F)
}

/// Encodes a year into a Set-or-Report Year suffix. Only the low 12 bits
/// of the year are representable; this covers every year up to 4095.
pub const fn year_suffix(year: u16) -> u16 {
    YEAR_SUFFIX_BASE | (year & 0x0FFF)
}

/// Encodes a signed Q10.2 rate into a Set-or-Report Rate suffix.
pub const fn rate_suffix(rate: i16) -> u16 {
    RATE_SUFFIX_BASE | (rate as u16 & 0x0FFF)
}

/// The event id a clock family uses for one suffix: `clock_id << 16 |
/// suffix` (§4.10).
pub const fn event_for_suffix(clock_id: NodeId, suffix: u16) -> EventId {
    EventId::from_node_and_suffix(clock_id, suffix)
}

/// `true` if `year` is a leap year (Gregorian rule).
pub const fn is_leap_year(year: u16) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// The number of days in `month` (1-12) of `year`.
pub const fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

/// A calendar date tracked by a clock slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CivilDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl CivilDate {
    pub const fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// Advances one day forward, rolling month and year as needed. Returns
    /// `true` if the month (and therefore the day-of-month) rolled over.
    pub fn advance_day(&mut self) -> bool {
        let last = days_in_month(self.year, self.month);
        if self.day < last {
            self.day += 1;
            false
        } else {
            self.day = 1;
            if self.month == 12 {
                self.month = 1;
                self.year += 1;
            } else {
                self.month += 1;
            }
            true
        }
    }

    /// Moves one day backward, unwrapping into the previous month's
    /// length (and previous year, for January 1st). Returns `true` if the
    /// month rolled over.
    pub fn retreat_day(&mut self) -> bool {
        if self.day > 1 {
            self.day -= 1;
            false
        } else {
            if self.month == 1 {
                self.month = 12;
                self.year -= 1;
            } else {
                self.month -= 1;
            }
            self.day = days_in_month(self.year, self.month);
            true
        }
    }
}

/// The outcome of running a clock slot's accumulator forward by one or
/// more fast-minutes during a single tick.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TickEvents {
    /// How many fast-minutes elapsed this tick (0 if the accumulator
    /// hadn't yet reached the threshold).
    pub minutes_advanced: u32,
    /// `true` if the calendar date changed (forward or backward) during
    /// this tick.
    pub date_rollover: bool,
}

/// One of up to 4 well-known clocks plus N custom clocks, carrying its own
/// time, date, rate, and run state (§4.10).
#[derive(Copy, Clone, Debug)]
pub struct ClockSlot {
    /// Event-id base this clock's suffixes are built on.
    pub clock_id: NodeId,
    pub hour: u8,
    pub minute: u8,
    pub date: CivilDate,
    /// Signed Q10.2 fixed point: `4` is 1.00x real time.
    pub rate: i16,
    pub is_running: bool,
    pub accumulator: u32,
    pub is_producer: bool,
    pub is_consumer: bool,
}

impl ClockSlot {
    pub const fn new(clock_id: NodeId, date: CivilDate, hour: u8, minute: u8) -> Self {
        Self {
            clock_id,
            hour,
            minute,
            date,
            rate: 4,
            is_running: false,
            accumulator: 0,
            is_producer: false,
            is_consumer: false,
        }
    }

    const fn rate_magnitude(&self) -> u32 {
        self.rate.unsigned_abs() as u32
    }

    /// Advances this clock's minute forward or backward, following the
    /// sign of `rate`, firing `date_rollover` when the day changes.
    fn step_one_minute(&mut self, forward: bool) -> bool {
        if forward {
            if self.minute == 59 {
                self.minute = 0;
                if self.hour == 23 {
                    self.hour = 0;
                    return self.date.advance_day();
                }
                self.hour += 1;
            } else {
                self.minute += 1;
            }
        } else if self.minute == 0 {
            self.minute = 59;
            if self.hour == 0 {
                self.hour = 23;
                return self.date.retreat_day();
            }
            self.hour -= 1;
        } else {
            self.minute -= 1;
        }
        false
    }

    /// Runs one 100 ms tick: if running, accumulates `100 * |rate|` and
    /// advances as many fast-minutes as the accumulator now covers. At
    /// `rate == 4` (1.00x) this reaches the threshold every 600 ticks,
    /// i.e. one simulated minute per 60 real seconds.
    pub fn tick(&mut self) -> TickEvents {
        let mut events = TickEvents::default();
        if !self.is_running || self.rate == 0 {
            return events;
        }
        self.accumulator += 100 * self.rate_magnitude();
        let forward = self.rate > 0;
        while self.accumulator >= FAST_MINUTE_THRESHOLD {
            self.accumulator -= FAST_MINUTE_THRESHOLD;
            if self.step_one_minute(forward) {
                events.date_rollover = true;
            }
            events.minutes_advanced += 1;
        }
        events
    }

    pub fn time_event(&self) -> EventId {
        event_for_suffix(self.clock_id, time_suffix(self.hour, self.minute))
    }

    pub fn date_event(&self) -> EventId {
        event_for_suffix(self.clock_id, date_suffix(self.date.month, self.date.day))
    }

    pub fn year_event(&self) -> EventId {
        event_for_suffix(self.clock_id, year_suffix(self.date.year))
    }

    pub fn rate_event(&self) -> EventId {
        event_for_suffix(self.clock_id, rate_suffix(self.rate))
    }

    pub fn start_or_stop_event(&self) -> EventId {
        let suffix = if self.is_running {
            SUFFIX_START
        } else {
            SUFFIX_STOP
        };
        event_for_suffix(self.clock_id, suffix)
    }

    /// The two producer registration ranges a producer clock owns, and a
    /// consumer clock owns for sending its Query PCER (§4.10).
    pub fn producer_ranges(&self) -> [EventId; 2] {
        [
            crate::event::range_base_and_mask(
                event_for_suffix(self.clock_id, 0x0000),
                0x8000,
            ),
            crate::event::range_base_and_mask(
                event_for_suffix(self.clock_id, 0x8000),
                0x8000,
            ),
        ]
    }

    /// The two consumer registration ranges a consumer clock owns for
    /// reports, and a producer clock owns for accepting Set commands.
    pub fn consumer_ranges(&self) -> [EventId; 2] {
        self.producer_ranges()
    }
}

/// One outgoing message of the 6-step query-reply sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueryStep {
    StartOrStop { event: EventId },
    Rate { event: EventId },
    Year { event: EventId },
    Date { event: EventId },
    Time { event: EventId },
    NextMinuteReport { event: EventId },
}

impl QueryStep {
    /// The MTI and 8-byte payload this step sends.
    pub fn frame(self) -> (Mti, [u8; 8]) {
        match self {
            QueryStep::StartOrStop { event }
            | QueryStep::Rate { event }
            | QueryStep::Year { event }
            | QueryStep::Date { event }
            | QueryStep::Time { event } => (Mti::PRODUCER_IDENTIFIED_VALID, event_payload(event)),
            QueryStep::NextMinuteReport { event } => (Mti::PC_EVENT_REPORT, event_payload(event)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SequenceState {
    Idle,
    StartStop,
    Rate,
    Year,
    Date,
    Time,
    NextMinute,
    Done,
}

/// Drives the producer's 6-message reply to a consumer's Query event,
/// yielding at most one step per call so a single 100 ms tick emits at
/// most one message and the sequence resumes cleanly across ticks
/// (§4.10, §8 S8).
#[derive(Copy, Clone, Debug)]
pub struct QuerySequencer {
    state: SequenceState,
}

impl Default for QuerySequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl QuerySequencer {
    pub const fn new() -> Self {
        Self {
            state: SequenceState::Idle,
        }
    }

    /// `true` once a Query has been received and the sequence has steps
    /// left to emit.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, SequenceState::Idle | SequenceState::Done)
    }

    /// Starts (or restarts) the sequence in response to an incoming Query.
    pub fn start(&mut self) {
        self.state = SequenceState::StartStop;
    }

    /// Produces the next step of the sequence, if any remains. `next`
    /// describes the clock's state *after* whatever minute advance is
    /// already in progress, so the final step reports the minute the
    /// clock is about to enter.
    pub fn advance(&mut self, slot: &ClockSlot, next_minute_event: EventId) -> Option<QueryStep> {
        let (step, following) = match self.state {
            SequenceState::Idle | SequenceState::Done => return None,
            SequenceState::StartStop => (
                QueryStep::StartOrStop {
                    event: slot.start_or_stop_event(),
                },
                SequenceState::Rate,
            ),
            SequenceState::Rate => (
                QueryStep::Rate {
                    event: slot.rate_event(),
                },
                SequenceState::Year,
            ),
            SequenceState::Year => (
                QueryStep::Year {
                    event: slot.year_event(),
                },
                SequenceState::Date,
            ),
            SequenceState::Date => (
                QueryStep::Date {
                    event: slot.date_event(),
                },
                SequenceState::Time,
            ),
            SequenceState::Time => (
                QueryStep::Time {
                    event: slot.time_event(),
                },
                SequenceState::NextMinute,
            ),
            SequenceState::NextMinute => (
                QueryStep::NextMinuteReport {
                    event: next_minute_event,
                },
                SequenceState::Done,
            ),
        };
        self.state = following;
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_slot() -> ClockSlot {
        let mut slot = ClockSlot::new(NodeId::new(0x0101_0101_0101), CivilDate::new(2024, 12, 31), 23, 59);
        slot.is_running = true;
        slot.rate = 4; // 1.00x
        slot
    }

    #[test]
    fn rate_4_is_one_to_one_and_takes_600_ticks_per_minute() {
        let mut slot = make_slot();
        for _ in 0..599 {
            let events = slot.tick();
            assert_eq!(events.minutes_advanced, 0);
        }
        let events = slot.tick();
        assert_eq!(events.minutes_advanced, 1);
    }

    #[test]
    fn s7_one_minute_of_ticks_rolls_year_and_date_exactly_once() {
        let mut slot = make_slot();
        let mut date_rollovers = 0;
        for _ in 0..600 {
            let events = slot.tick();
            if events.date_rollover {
                date_rollovers += 1;
            }
        }
        assert_eq!(date_rollovers, 1);
        assert_eq!(slot.date, CivilDate::new(2025, 1, 1));
        assert_eq!((slot.hour, slot.minute), (0, 9));
    }

    #[test]
    fn negative_rate_runs_the_clock_backward() {
        let mut slot = ClockSlot::new(NodeId::new(0x01), CivilDate::new(2025, 1, 1), 0, 0);
        slot.is_running = true;
        slot.rate = -4;
        let mut rollovers = 0;
        for _ in 0..600 {
            if slot.tick().date_rollover {
                rollovers += 1;
            }
        }
        assert_eq!(rollovers, 1);
        assert_eq!(slot.date, CivilDate::new(2024, 12, 31));
        assert_eq!((slot.hour, slot.minute), (23, 59));
    }

    #[test]
    fn stopped_clock_never_advances() {
        let mut slot = make_slot();
        slot.is_running = false;
        for _ in 0..1000 {
            assert_eq!(slot.tick().minutes_advanced, 0);
        }
    }

    #[test]
    fn leap_year_february_has_29_days() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(1900, 2), 28);
        assert_eq!(days_in_month(2000, 2), 29);
    }

    #[test]
    fn s8_query_sequence_emits_six_steps_in_order() {
        let slot = make_slot();
        let mut seq = QuerySequencer::new();
        assert!(!seq.is_active());
        seq.start();
        let next_minute = event_for_suffix(slot.clock_id, time_suffix(0, 0));

        let mut steps = heapless::Vec::<QueryStep, 6>::new();
        while let Some(step) = seq.advance(&slot, next_minute) {
            steps.push(step).unwrap();
        }
        assert_eq!(steps.len(), 6);
        assert!(matches!(steps[0], QueryStep::StartOrStop { .. }));
        assert!(matches!(steps[1], QueryStep::Rate { .. }));
        assert!(matches!(steps[2], QueryStep::Year { .. }));
        assert!(matches!(steps[3], QueryStep::Date { .. }));
        assert!(matches!(steps[4], QueryStep::Time { .. }));
        assert!(matches!(steps[5], QueryStep::NextMinuteReport { .. }));
        assert_eq!(seq.advance(&slot, next_minute), None);
    }

    #[test]
    fn suffix_ranges_do_not_collide() {
        assert_ne!(time_suffix(23, 59) & 0xE000, date_suffix(12, 31) & 0xE000);
        assert_ne!(date_suffix(12, 31) & 0xF000, year_suffix(2025) & 0xF000);
        assert_ne!(year_suffix(2025) & 0xF000, rate_suffix(-4) & 0xF000);
    }
}
