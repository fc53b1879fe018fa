// Time bucketed counters
use crate::{states::TimelineKind, Error};

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use itertools::Itertools;
use rusqlite::{params_from_iter, Connection};

type Result<T, E = crate::Error> = anyhow::Result<T, E>;

const DAYS: i64 = 7;
const HOURS: i64 = 24;

/// Keys for `date` and the six days before it, most recent first
pub fn daily_keys(date: NaiveDate, kind: TimelineKind) -> Vec<(NaiveDate, String)> {
    (0..DAYS)
        .map(|offset| {
            let day = date - Duration::days(offset);
            let key = format!("stats:{}:{}", kind.name(), day.format("%Y-%m-%d"));
            (day, key)
        })
        .collect()
}

/// Keys for the hour containing `instant` and the 23 hours before it, most recent first
pub fn hourly_keys(instant: DateTime<Utc>, kind: TimelineKind) -> Vec<(DateTime<Utc>, String)> {
    let hour = instant
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant);
    (0..HOURS)
        .map(|offset| {
            let bucket = hour - Duration::hours(offset);
            let key = format!("stats:{}:{}", kind.name(), bucket.format("%Y-%m-%d-%H"));
            (bucket, key)
        })
        .collect()
}

/// Sums both counter shapes for exactly the requested keys. Keys without rows count as 0.
pub fn resolve_counts<S: AsRef<str>>(
    connection: &Connection,
    keys: &[S],
) -> Result<HashMap<String, i64>> {
    let keys: Vec<&str> = keys.iter().map(|key| key.as_ref()).collect();
    let mut counts: HashMap<String, i64> =
        keys.iter().map(|key| ((*key).to_owned(), 0)).collect();
    if counts.is_empty() {
        return Ok(counts);
    }
    let placeholders = (1..=keys.len()).map(|i| format!("?{i}")).join(", ");
    let mut statement = connection
        .prepare(&format!(
            r"
SELECT key, SUM(value) AS total
FROM (
    SELECT key, value FROM jobby_counter WHERE key IN ({placeholders})
    UNION ALL
    SELECT key, value FROM jobby_aggregated_counter WHERE key IN ({placeholders})
)
GROUP BY key
;"
        ))
        .map_err(|e| Error::Query("counters", e))?;
    let rows = statement
        .query_map(params_from_iter(keys.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| Error::Query("counters", e))?;
    for row in rows {
        let (key, total) = row.map_err(|e| Error::Query("counters", e))?;
        if let Some(count) = counts.get_mut(&key) {
            *count = total;
        }
    }
    Ok(counts)
}

fn buckets<T: Copy>(connection: &Connection, keys: Vec<(T, String)>) -> Result<Vec<(T, i64)>> {
    let names: Vec<&str> = keys.iter().map(|(_, key)| key.as_str()).collect();
    let counts = resolve_counts(connection, &names)?;
    Ok(keys
        .iter()
        .map(|(bucket, key)| (*bucket, counts.get(key).copied().unwrap_or_default()))
        .collect())
}

/// Seven daily counts ending at the day of `now`, most recent first
pub fn daily_buckets(
    connection: &Connection,
    now: DateTime<Utc>,
    kind: TimelineKind,
) -> Result<Vec<(NaiveDate, i64)>> {
    buckets(connection, daily_keys(now.date_naive(), kind))
}

/// 24 hourly counts ending at the hour of `now`, most recent first
pub fn hourly_buckets(
    connection: &Connection,
    now: DateTime<Utc>,
    kind: TimelineKind,
) -> Result<Vec<(DateTime<Utc>, i64)>> {
    buckets(connection, hourly_keys(now, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 5, 42, 17).unwrap()
    }

    #[test]
    fn daily_keys_cover_seven_contiguous_days() {
        let keys = daily_keys(now().date_naive(), TimelineKind::Succeeded);
        assert_eq!(keys.len(), 7);
        assert_eq!(keys[0].1, "stats:succeeded:2024-03-01");
        // crosses the leap day
        assert_eq!(keys[1].1, "stats:succeeded:2024-02-29");
        assert_eq!(keys[6].1, "stats:succeeded:2024-02-24");
        for pair in keys.windows(2) {
            assert_eq!(pair[0].0 - pair[1].0, Duration::days(1));
        }
    }

    #[test]
    fn hourly_keys_cover_twenty_four_contiguous_hours() {
        let keys = hourly_keys(now(), TimelineKind::Failed);
        assert_eq!(keys.len(), 24);
        assert_eq!(keys[0].0, Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap());
        assert_eq!(keys[0].1, "stats:failed:2024-03-01-05");
        assert_eq!(keys[5].1, "stats:failed:2024-03-01-00");
        assert_eq!(keys[6].1, "stats:failed:2024-02-29-23");
        assert_eq!(keys[23].1, "stats:failed:2024-02-29-06");
        for pair in keys.windows(2) {
            assert_eq!(pair[0].0 - pair[1].0, Duration::hours(1));
        }
    }

    #[test]
    fn resolve_counts_sums_both_shapes() {
        let connection = testing::connection();
        testing::insert_counter(&connection, "stats:succeeded", 1);
        testing::insert_counter(&connection, "stats:succeeded", 2);
        testing::insert_aggregated_counter(&connection, "stats:succeeded", 5);
        testing::insert_aggregated_counter(&connection, "stats:deleted", 4);
        testing::insert_counter(&connection, "stats:failed", 9);

        let counts =
            resolve_counts(&connection, &["stats:succeeded", "stats:deleted", "nope"]).unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["stats:succeeded"], 8);
        assert_eq!(counts["stats:deleted"], 4);
        assert_eq!(counts["nope"], 0);
        assert!(!counts.contains_key("stats:failed"));
    }

    #[test]
    fn resolve_counts_with_no_keys_is_empty() {
        let connection = testing::connection();
        let keys: [&str; 0] = [];
        assert!(resolve_counts(&connection, &keys).unwrap().is_empty());
    }

    #[test]
    fn sparse_days_are_filled_with_zero() {
        let connection = testing::connection();
        testing::insert_aggregated_counter(&connection, "stats:succeeded:2024-03-01", 10);
        testing::insert_counter(&connection, "stats:succeeded:2024-03-01", 1);
        testing::insert_counter(&connection, "stats:succeeded:2024-02-26", 3);
        // outside the window
        testing::insert_counter(&connection, "stats:succeeded:2024-02-23", 100);
        testing::insert_counter(&connection, "stats:failed:2024-03-01", 7);

        let days = daily_buckets(&connection, now(), TimelineKind::Succeeded).unwrap();
        let counts: Vec<i64> = days.iter().map(|(_, count)| *count).collect();
        assert_eq!(counts, vec![11, 0, 0, 0, 3, 0, 0]);
        assert_eq!(days[0].0, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn sparse_hours_are_filled_with_zero() {
        let connection = testing::connection();
        testing::insert_counter(&connection, "stats:failed:2024-03-01-05", 2);
        testing::insert_aggregated_counter(&connection, "stats:failed:2024-02-29-06", 4);

        let hours = hourly_buckets(&connection, now(), TimelineKind::Failed).unwrap();
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[0].1, 2);
        assert_eq!(hours[23].1, 4);
        assert_eq!(hours.iter().map(|(_, count)| count).sum::<i64>(), 6);
    }
}
