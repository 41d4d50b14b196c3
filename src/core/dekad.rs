//! Dekad calendar: 36 roughly ten-day periods per year

use chrono::NaiveDate;

use crate::types::{to_millis, RendviError, RendviResult};

/// Day-of-year boundaries of the 36 dekads in a non-leap year; the last entry closes dekad 36
pub const PERPETUAL_DEKADS: [u32; 37] = [
    1, 11, 21, 32, 42, 52, 60, 70, 80, 91, 101, 111, 121, 131, 141, 152, 162, 172, 182, 192, 202, 213, 223, 233,
    244, 254, 264, 274, 284, 294, 305, 315, 325, 335, 345, 355, 366,
];

/// Day-of-year boundaries of the 36 dekads in a leap year
pub const LEAP_DEKADS: [u32; 37] = [
    1, 11, 21, 32, 42, 52, 61, 71, 81, 92, 102, 112, 122, 132, 142, 153, 163, 173, 183, 193, 203, 214, 224, 234,
    245, 255, 265, 275, 285, 295, 306, 316, 326, 336, 346, 356, 367,
];

pub const DEKADS_PER_YEAR: u32 = 36;

/// Leap years for dekad purposes are exactly the years divisible by four
pub fn is_leap(year: i32) -> bool {
    year.rem_euclid(4) == 0
}

pub fn dekad_table(year: i32) -> &'static [u32; 37] {
    if is_leap(year) {
        &LEAP_DEKADS
    } else {
        &PERPETUAL_DEKADS
    }
}

/// The 36 `[start, end)` day-of-year ranges of a year
pub fn dekad_ranges(year: i32) -> Vec<(u32, u32)> {
    dekad_table(year).windows(2).map(|pair| (pair[0], pair[1])).collect()
}

/// Calendar date on which a one-based dekad starts
pub fn dekad_to_date(dekad: u32, year: i32) -> RendviResult<NaiveDate> {
    if !(1..=DEKADS_PER_YEAR).contains(&dekad) {
        return Err(RendviError::InvalidDekad { dekad });
    }
    let doy = dekad_table(year)[(dekad - 1) as usize];
    day_of_year_to_date(year, doy)
}

pub(crate) fn day_of_year_to_date(year: i32, doy: u32) -> RendviResult<NaiveDate> {
    NaiveDate::from_yo_opt(year, doy).ok_or_else(|| RendviError::InvalidDate(format!("{}-{:03}", year, doy)))
}

/// Epoch milliseconds of midnight UTC on a given day of year
pub(crate) fn day_of_year_millis(year: i32, doy: u32) -> RendviResult<i64> {
    let date = day_of_year_to_date(year, doy)?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| to_millis(&dt))
        .ok_or_else(|| RendviError::InvalidDate(date.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_tables_have_36_contiguous_periods() {
        for year in [1999, 2000, 2001, 2019, 2020, 2100] {
            let ranges = dekad_ranges(year);
            assert_eq!(ranges.len(), 36);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].1, pair[1].0);
                assert!(pair[0].0 < pair[0].1);
            }
        }
    }

    #[test]
    fn test_leap_table_selection() {
        assert_eq!(dekad_table(2020)[6], 61);
        assert_eq!(dekad_table(2021)[6], 60);
        // divisibility by four only, century years included
        assert!(is_leap(1900));
        assert!(is_leap(-4));
        assert!(!is_leap(2019));
    }

    #[test]
    fn test_first_dekad_is_new_year() {
        for year in 1990..2030 {
            let date = dekad_to_date(1, year).unwrap();
            assert_eq!((date.year(), date.month(), date.day()), (year, 1, 1));
        }
    }

    #[test]
    fn test_dekad_to_date() {
        assert_eq!(dekad_to_date(7, 2021).unwrap(), NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
        assert_eq!(dekad_to_date(7, 2020).unwrap(), NaiveDate::from_ymd_opt(2020, 3, 1).unwrap());
        assert_eq!(dekad_to_date(36, 2021).unwrap(), NaiveDate::from_ymd_opt(2021, 12, 21).unwrap());
        assert!(matches!(dekad_to_date(0, 2021), Err(RendviError::InvalidDekad { dekad: 0 })));
        assert!(matches!(dekad_to_date(37, 2021), Err(RendviError::InvalidDekad { dekad: 37 })));
    }
}
