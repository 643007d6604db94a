//! Fee computation.
//!
//! A [`Tariff`] prices one stay from its entry and exit instants; a
//! [`TariffSchedule`] picks the tariff for a vehicle class or a member entry.
//!
//! # Pricing rule
//!
//! 1. A stay no longer than `grace_minutes` is free.
//! 2. Otherwise the stay is billed per started hour (at least one):
//!    `first_hour_fee + (hours - 1) * subsequent_hour_fee`.
//! 3. With a `daily_cap`, every complete 24 hour block costs at most the cap,
//!    and so does the remainder.
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use exitgate_core::Tariff;
//!
//! let tariff = Tariff::new(2000, 1000);
//! let entry = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
//! let exit = Utc.with_ymd_and_hms(2025, 1, 1, 11, 30, 0).unwrap();
//! assert_eq!(tariff.fee(entry, exit), 4000);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Category, VehicleClass};

const SECS_PER_HOUR: i64 = 3_600;
const HOURS_PER_DAY: i64 = 24;

/// Hourly tariff of one vehicle class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tariff {
    /// Fee of the first started hour.
    pub first_hour_fee: i64,

    /// Fee of every further started hour.
    pub subsequent_hour_fee: i64,

    /// Maximum charged per 24 hour block.
    pub daily_cap: Option<i64>,

    /// Stays up to this length are free.
    pub grace_minutes: u32,
}

impl Default for Tariff {
    fn default() -> Self {
        Self::free()
    }
}

impl Tariff {
    /// Tariff without cap or grace period.
    pub const fn new(first_hour_fee: i64, subsequent_hour_fee: i64) -> Self {
        Self {
            first_hour_fee,
            subsequent_hour_fee,
            daily_cap: None,
            grace_minutes: 0,
        }
    }

    /// Tariff that never charges.
    pub const fn free() -> Self {
        Self::new(0, 0)
    }

    /// Same rate for every hour.
    pub const fn flat(hourly_fee: i64) -> Self {
        Self::new(hourly_fee, hourly_fee)
    }

    /// Set the daily cap.
    pub const fn with_daily_cap(mut self, cap: i64) -> Self {
        self.daily_cap = Some(cap);
        self
    }

    /// Set the grace period.
    pub const fn with_grace_minutes(mut self, minutes: u32) -> Self {
        self.grace_minutes = minutes;
        self
    }

    /// Billable started hours of a stay, `0` inside the grace period.
    #[must_use]
    pub fn billable_hours(&self, entry: DateTime<Utc>, exit: DateTime<Utc>) -> i64 {
        let secs = (exit - entry).num_seconds().max(0);
        if secs <= i64::from(self.grace_minutes) * 60 {
            return 0;
        }
        // div_ceil on i64 is still unstable
        ((secs + SECS_PER_HOUR - 1) / SECS_PER_HOUR).max(1)
    }

    /// Fee of the stay from `entry` to `exit`.
    ///
    /// An `exit` before `entry` is priced as a zero-length stay.
    #[must_use]
    pub fn fee(&self, entry: DateTime<Utc>, exit: DateTime<Utc>) -> i64 {
        let hours = self.billable_hours(entry, exit);
        if hours == 0 {
            return 0;
        }

        match self.daily_cap {
            None => self.hourly_fee(hours),
            Some(cap) => {
                let days = hours / HOURS_PER_DAY;
                let rest = hours % HOURS_PER_DAY;
                let day_fee = self.hourly_fee(HOURS_PER_DAY).min(cap);
                let rest_fee = if rest > 0 {
                    self.hourly_fee(rest).min(cap)
                } else {
                    0
                };
                day_fee.saturating_mul(days).saturating_add(rest_fee)
            }
        }
    }

    fn hourly_fee(&self, hours: i64) -> i64 {
        self.subsequent_hour_fee
            .saturating_mul(hours - 1)
            .saturating_add(self.first_hour_fee)
    }
}

/// Tariffs of a lane, one per vehicle class plus one for members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TariffSchedule {
    pub motorcycle: Tariff,
    pub car: Tariff,
    pub truck: Tariff,
    /// Applied to every member entry regardless of vehicle class.
    pub member: Tariff,
}

impl Default for TariffSchedule {
    fn default() -> Self {
        Self {
            motorcycle: Tariff::flat(5_000),
            car: Tariff::flat(10_000),
            truck: Tariff::flat(15_000),
            member: Tariff::free(),
        }
    }
}

impl TariffSchedule {
    /// Tariff of a vehicle class.
    #[must_use]
    pub fn for_class(&self, class: VehicleClass) -> &Tariff {
        match class {
            VehicleClass::Motorcycle => &self.motorcycle,
            VehicleClass::Car => &self.car,
            VehicleClass::Truck => &self.truck,
        }
    }

    /// Tariff applied to a stay of the given category and class.
    #[must_use]
    pub fn tariff_for(&self, category: Category, class: VehicleClass) -> &Tariff {
        match category {
            Category::Member => &self.member,
            Category::Casual => self.for_class(class),
        }
    }

    /// Fee of a stay.
    #[must_use]
    pub fn fee(
        &self,
        category: Category,
        class: VehicleClass,
        entry: DateTime<Utc>,
        exit: DateTime<Utc>,
    ) -> i64 {
        self.tariff_for(category, class).fee(entry, exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_two_and_a_half_hours() {
        let tariff = Tariff::new(2000, 1000);
        assert_eq!(tariff.billable_hours(at(9, 0), at(11, 30)), 3);
        assert_eq!(tariff.fee(at(9, 0), at(11, 30)), 4000);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 2000)]
    #[case(60, 2000)]
    #[case(61, 3000)]
    #[case(180, 4000)]
    #[case(181, 5000)]
    fn test_started_hours(#[case] minutes: i64, #[case] expected: i64) {
        let tariff = Tariff::new(2000, 1000);
        let entry = at(9, 0);
        assert_eq!(tariff.fee(entry, entry + Duration::minutes(minutes)), expected);
    }

    #[rstest]
    #[case(10, 0)]
    #[case(15, 0)]
    #[case(16, 2000)]
    fn test_grace_period(#[case] minutes: i64, #[case] expected: i64) {
        let tariff = Tariff::new(2000, 1000).with_grace_minutes(15);
        let entry = at(9, 0);
        assert_eq!(tariff.fee(entry, entry + Duration::minutes(minutes)), expected);
    }

    #[test]
    fn test_exit_before_entry_is_free() {
        let tariff = Tariff::new(2000, 1000);
        assert_eq!(tariff.fee(at(11, 0), at(9, 0)), 0);
    }

    #[test]
    fn test_daily_cap() {
        let tariff = Tariff::flat(1000).with_daily_cap(15_000);
        let entry = at(0, 0);

        // 10 hours stay under the cap
        assert_eq!(tariff.fee(entry, entry + Duration::hours(10)), 10_000);
        // 20 hours are capped
        assert_eq!(tariff.fee(entry, entry + Duration::hours(20)), 15_000);
        // one day plus three hours
        assert_eq!(tariff.fee(entry, entry + Duration::hours(27)), 18_000);
        // two full days
        assert_eq!(tariff.fee(entry, entry + Duration::hours(48)), 30_000);
    }

    #[test]
    fn test_schedule_defaults() {
        let schedule = TariffSchedule::default();
        let (entry, exit) = (at(9, 0), at(10, 0));

        assert_eq!(schedule.fee(Category::Casual, VehicleClass::Motorcycle, entry, exit), 5_000);
        assert_eq!(schedule.fee(Category::Casual, VehicleClass::Car, entry, exit), 10_000);
        assert_eq!(schedule.fee(Category::Casual, VehicleClass::Truck, entry, exit), 15_000);
        assert_eq!(schedule.fee(Category::Member, VehicleClass::Truck, entry, exit), 0);
    }

    #[test]
    fn test_schedule_from_toml() {
        let schedule: TariffSchedule = toml::from_str(
            r#"
            [car]
            first_hour_fee = 2000
            subsequent_hour_fee = 1000
            daily_cap = 20000
            grace_minutes = 10
            "#,
        )
        .unwrap();

        assert_eq!(
            schedule.car,
            Tariff::new(2000, 1000).with_daily_cap(20_000).with_grace_minutes(10)
        );
        assert_eq!(schedule.truck, Tariff::flat(15_000));
        assert_eq!(schedule.member, Tariff::free());
    }
}
