use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::contract::Record;

/// Keeps records published on one calendar day of the site's local time.
#[derive(Debug, Clone)]
pub struct DateWindowFilter {
    target: NaiveDate,
    date_field: String,
    site_offset: FixedOffset,
}

impl DateWindowFilter {
    pub fn new(target: NaiveDate, date_field: impl Into<String>, site_offset: FixedOffset) -> Self {
        Self {
            target,
            date_field: date_field.into(),
            site_offset,
        }
    }

    pub fn target(&self) -> NaiveDate {
        self.target
    }

    /// Publish date of `record`, if its date field holds something date-like.
    pub fn publish_date(&self, record: &Record) -> Option<NaiveDate> {
        record
            .get(&self.date_field)
            .and_then(|v| v.as_str())
            .and_then(|raw| parse_publish_date(raw, self.site_offset))
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.publish_date(record) == Some(self.target)
    }

    /// Moves the matching records out of `records`, keeping their order.
    pub fn retain_matching(&self, records: Vec<Record>) -> Vec<Record> {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD <anything>` and RFC 3339 timestamps.
///
/// Plain dates are already site-local. RFC 3339 timestamps are moved to
/// `site_offset` before the date is taken, so `2024-01-01T22:30:00Z` is
/// 2024-01-02 on a `+03:00` site.
pub fn parse_publish_date(raw: &str, site_offset: FixedOffset) -> Option<NaiveDate> {
    let raw = raw.trim();
    let first = raw.split_whitespace().next()?;
    if let Ok(date) = NaiveDate::parse_from_str(first, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&site_offset).date_naive())
}
