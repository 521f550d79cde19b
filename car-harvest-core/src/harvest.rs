//! Per-category pagination through the extractor.
//!
//! A [`CategoryHarvester`] walks one category's pagination plan in order,
//! holding a single [`ConcurrencyLimiter`] slot for the whole walk. Page
//! failures are logged and skipped; they never end the walk early.
//! [`HarvestTask`] wraps a harvest in a spawned tokio task so a chunk's
//! categories run side by side.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::CategorySpec;
use crate::contract::{Extractor, Record};
use crate::filter::DateWindowFilter;
use crate::limiter::ConcurrencyLimiter;
use crate::pacing::Pacer;

/// What one category produced.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestedCategory {
    /// Matching records, in pagination order.
    pub records: Vec<Record>,
    pub pages_attempted: u32,
    pub pages_failed: u32,
    /// Records returned by the extractor before date filtering.
    pub records_seen: usize,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HarvestError {
    #[error("every one of the {pages} pages of '{category}' failed to load")]
    AllPagesFailed { category: String, pages: u32 },

    #[error("harvest task for '{category}' died: {reason}")]
    TaskFailed { category: String, reason: String },
}

pub type HarvestResult = Result<HarvestedCategory, HarvestError>;

#[derive(Clone)]
pub struct CategoryHarvester {
    extractor: Arc<dyn Extractor>,
    filter: DateWindowFilter,
    pacer: Pacer,
}

impl CategoryHarvester {
    pub fn new(extractor: Arc<dyn Extractor>, filter: DateWindowFilter, pacer: Pacer) -> Self {
        Self {
            extractor,
            filter,
            pacer,
        }
    }

    pub async fn harvest(
        &self,
        category: &CategorySpec,
        limiter: &ConcurrencyLimiter,
    ) -> HarvestResult {
        let _slot = limiter.acquire().await;
        info!(
            category = %category.name,
            pages = category.total_pages(),
            in_use = limiter.in_use(),
            "[HARVEST] Starting category"
        );

        let mut harvested = HarvestedCategory {
            records: Vec::new(),
            pages_attempted: 0,
            pages_failed: 0,
            records_seen: 0,
        };
        let total = category.total_pages();

        for plan in &category.pages {
            for page in 1..=plan.page_count {
                let url = plan.page_url(page);
                harvested.pages_attempted += 1;

                match self.extractor.fetch(&url).await {
                    Ok(records) => {
                        let seen = records.len();
                        let matched = self.filter.retain_matching(records);
                        debug!(
                            category = %category.name,
                            url = %url,
                            seen,
                            matched = matched.len(),
                            "[HARVEST] Page fetched"
                        );
                        harvested.records_seen += seen;
                        harvested.records.extend(matched);
                    }
                    Err(e) => {
                        harvested.pages_failed += 1;
                        warn!(
                            category = %category.name,
                            url = %url,
                            error = %e,
                            "[HARVEST] Page failed, skipping"
                        );
                    }
                }

                if u64::from(harvested.pages_attempted) < total {
                    self.pacer.between_pages().await;
                }
            }
        }

        if harvested.pages_attempted > 0 && harvested.pages_failed == harvested.pages_attempted {
            error!(
                category = %category.name,
                pages = harvested.pages_attempted,
                "[HARVEST] Every page failed"
            );
            return Err(HarvestError::AllPagesFailed {
                category: category.name.clone(),
                pages: harvested.pages_attempted,
            });
        }

        info!(
            category = %category.name,
            matched = harvested.records.len(),
            seen = harvested.records_seen,
            pages_failed = harvested.pages_failed,
            target_date = %self.filter.target(),
            "[HARVEST] Category finished"
        );
        Ok(harvested)
    }
}

/// A category harvest running on the tokio runtime.
pub struct HarvestTask {
    category: String,
    handle: JoinHandle<HarvestResult>,
}

impl HarvestTask {
    /// Starts harvesting `category` immediately, inside the caller's span.
    pub fn spawn(
        harvester: CategoryHarvester,
        category: CategorySpec,
        limiter: ConcurrencyLimiter,
    ) -> Self {
        let name = category.name.clone();
        let handle = tokio::spawn(
            async move { harvester.harvest(&category, &limiter).await }.in_current_span(),
        );
        Self {
            category: name,
            handle,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Waits for the harvest. A panicked or aborted task becomes
    /// [`HarvestError::TaskFailed`].
    pub async fn join(self) -> HarvestResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(HarvestError::TaskFailed {
                category: self.category,
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PacingConfig, PagePlan};
    use crate::contract::{ExtractionError, MockExtractor};
    use chrono::{FixedOffset, NaiveDate};
    use mockall::Sequence;

    fn filter() -> DateWindowFilter {
        DateWindowFilter::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            "date_published",
            FixedOffset::east_opt(3 * 3600).unwrap(),
        )
    }

    fn listing(title: &str, date: &str) -> Record {
        Record::new().with("title", title).with("date_published", date)
    }

    #[tokio::test]
    async fn walks_templates_in_order_and_pages_ascending() {
        let mut extractor = MockExtractor::new();
        let mut seq = Sequence::new();
        for url in ["http://a/1", "http://a/2", "http://b/1"] {
            extractor
                .expect_fetch()
                .withf(move |u| u == url)
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |u| Ok(vec![listing(u, "2024-01-02 09:00")]));
        }

        let harvester = CategoryHarvester::new(
            Arc::new(extractor),
            filter(),
            Pacer::new(PacingConfig::none()),
        );
        let category = CategorySpec::new(
            "classic",
            vec![PagePlan::new("http://a/{}", 2), PagePlan::new("http://b/{}", 1)],
        );

        let out = harvester
            .harvest(&category, &ConcurrencyLimiter::new(1))
            .await
            .unwrap();

        let titles: Vec<_> = out
            .records
            .iter()
            .map(|r| r.get("title").unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["http://a/1", "http://a/2", "http://b/1"]);
        assert_eq!(out.pages_attempted, 3);
    }

    #[tokio::test]
    async fn failed_page_is_skipped_and_the_walk_continues() {
        let mut extractor = MockExtractor::new();
        extractor.expect_fetch().returning(|u| {
            if u.ends_with("/2") {
                Err(ExtractionError::Status {
                    url: u.to_string(),
                    status: 502,
                })
            } else {
                Ok(vec![
                    listing("match", "2024-01-02 10:00"),
                    listing("old", "2024-01-01 10:00"),
                ])
            }
        });

        let harvester = CategoryHarvester::new(
            Arc::new(extractor),
            filter(),
            Pacer::new(PacingConfig::none()),
        );
        let category = CategorySpec::new("junk", vec![PagePlan::new("http://j/{}", 3)]);
        let limiter = ConcurrencyLimiter::new(1);

        let out = harvester.harvest(&category, &limiter).await.unwrap();

        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records_seen, 4);
        assert_eq!(out.pages_failed, 1);
        assert_eq!(limiter.in_use(), 0, "slot must be released");
    }

    #[tokio::test]
    async fn zero_page_count_issues_no_requests() {
        let mut extractor = MockExtractor::new();
        extractor.expect_fetch().never();

        let harvester = CategoryHarvester::new(
            Arc::new(extractor),
            filter(),
            Pacer::new(PacingConfig::none()),
        );
        let category = CategorySpec::new("rentals", vec![PagePlan::new("http://r/{}", 0)]);

        let out = harvester
            .harvest(&category, &ConcurrencyLimiter::new(1))
            .await
            .unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.pages_attempted, 0);
    }

    #[tokio::test]
    async fn all_pages_failing_is_reported_as_an_error() {
        let mut extractor = MockExtractor::new();
        extractor.expect_fetch().times(2).returning(|u| {
            Err(ExtractionError::Request {
                url: u.to_string(),
                reason: "connection reset".into(),
            })
        });

        let harvester = CategoryHarvester::new(
            Arc::new(extractor),
            filter(),
            Pacer::new(PacingConfig::none()),
        );
        let category = CategorySpec::new("boats", vec![PagePlan::new("http://w/{}", 2)]);
        let limiter = ConcurrencyLimiter::new(1);

        let err = harvester.harvest(&category, &limiter).await.unwrap_err();
        assert_eq!(
            err,
            HarvestError::AllPagesFailed {
                category: "boats".into(),
                pages: 2
            }
        );
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn paces_between_pages_but_not_after_the_last() {
        let mut extractor = MockExtractor::new();
        extractor.expect_fetch().returning(|_| Ok(vec![]));

        let pacing = PacingConfig {
            page_delay: std::time::Duration::from_secs(3),
            ..PacingConfig::none()
        };
        let harvester = CategoryHarvester::new(Arc::new(extractor), filter(), Pacer::new(pacing));
        let category = CategorySpec::new("parts", vec![PagePlan::new("http://p/{}", 3)]);

        let start = tokio::time::Instant::now();
        harvester
            .harvest(&category, &ConcurrencyLimiter::new(1))
            .await
            .unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= std::time::Duration::from_secs(6));
        assert!(elapsed < std::time::Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn harvest_waits_for_a_free_slot() {
        let mut extractor = MockExtractor::new();
        extractor
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(vec![listing("x", "2024-01-02")]));
        let harvester = CategoryHarvester::new(
            Arc::new(extractor),
            filter(),
            Pacer::new(PacingConfig::none()),
        );
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await;

        let task = HarvestTask::spawn(
            harvester,
            CategorySpec::new("boats", vec![PagePlan::new("http://b/{}", 1)]),
            limiter.clone(),
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!task.handle.is_finished(), "harvest must queue behind the held slot");

        drop(held);
        assert_eq!(task.join().await.unwrap().records.len(), 1);
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn spawned_task_yields_the_harvest() {
        let mut extractor = MockExtractor::new();
        extractor
            .expect_fetch()
            .returning(|_| Ok(vec![listing("x", "2024-01-02")]));
        let harvester = CategoryHarvester::new(
            Arc::new(extractor),
            filter(),
            Pacer::new(PacingConfig::none()),
        );

        let task = HarvestTask::spawn(
            harvester,
            CategorySpec::new("food-trucks", vec![PagePlan::new("http://f/{}", 1)]),
            ConcurrencyLimiter::new(1),
        );
        assert_eq!(task.category(), "food-trucks");
        let out = task.join().await.unwrap();
        assert_eq!(out.records.len(), 1);
    }
}
