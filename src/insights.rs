//! Derived sales analytics over a time window of deal records.
//!
//! Every insight is optional: a metric that is not well defined for the
//! window is reported as `None` rather than as zero.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{InsightError, StoreError};

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Longest accepted lookback.
pub const MAX_WINDOW_DAYS: u32 = 3650;

/// A category needs more than this many records to be ranked.
pub const MIN_CATEGORY_SAMPLE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealOutcome {
    Open,
    Won,
    Lost,
}

/// One deal as seen by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealRecord {
    /// Market segment the deal belongs to.
    #[serde(default)]
    pub category: Option<String>,
    pub outcome: DealOutcome,
    #[serde(default)]
    pub value: f64,
    /// Responsible sales rep.
    #[serde(default)]
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Source of deal records for a time window.
#[async_trait]
pub trait DealSource: Send + Sync {
    /// Records created within `[since, until]`, in a stable order.
    async fn deals_created_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DealRecord>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryDealSource {
    deals: RwLock<Vec<DealRecord>>,
}

impl InMemoryDealSource {
    pub fn new(deals: Vec<DealRecord>) -> Self {
        Self {
            deals: RwLock::new(deals),
        }
    }

    pub async fn push(&self, deal: DealRecord) {
        self.deals.write().await.push(deal);
    }
}

#[async_trait]
impl DealSource for InMemoryDealSource {
    async fn deals_created_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DealRecord>, StoreError> {
        let guard = self.deals.read().await;
        Ok(guard
            .iter()
            .filter(|d| d.created_at >= since && d.created_at <= until)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestNiche {
    pub name: String,
    /// Won share in percent, rounded to one decimal.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesCycle {
    pub days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopRep {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightReport {
    pub best_niche: Option<BestNiche>,
    pub sales_cycle: Option<SalesCycle>,
    pub top_rep: Option<TopRep>,
}

/// Parse a period such as `"30d"` into a number of days.
pub fn parse_period(period: &str) -> Result<u32, InsightError> {
    let invalid = || InsightError::InvalidPeriod(period.to_string());
    let days = period
        .trim()
        .strip_suffix('d')
        .ok_or_else(invalid)?
        .parse::<u32>()
        .map_err(|_| invalid())?;

    if days == 0 || days > MAX_WINDOW_DAYS {
        return Err(invalid());
    }
    Ok(days)
}

#[derive(Default)]
struct CategoryTally {
    total: usize,
    won: usize,
}

/// Keyed accumulator that remembers first-seen order for tie breaks.
struct FirstSeen<T> {
    index: HashMap<String, usize>,
    entries: Vec<(String, T)>,
}

impl<T: Default> FirstSeen<T> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn entry(&mut self, key: &str) -> &mut T {
        let existing = self.index.get(key).copied();
        let pos = match existing {
            Some(pos) => pos,
            None => {
                self.entries.push((key.to_string(), T::default()));
                self.index.insert(key.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        &mut self.entries[pos].1
    }
}

/// Compute all insights over an already-windowed record set.
pub fn compute_insights(deals: &[DealRecord]) -> InsightReport {
    let mut categories: FirstSeen<CategoryTally> = FirstSeen::new();
    let mut reps: FirstSeen<f64> = FirstSeen::new();
    let mut cycle_days_total: i64 = 0;
    let mut cycle_samples: i64 = 0;

    for deal in deals {
        let won = deal.outcome == DealOutcome::Won;

        if let Some(category) = deal.category.as_deref().filter(|c| !c.is_empty()) {
            let tally = categories.entry(category);
            tally.total += 1;
            if won {
                tally.won += 1;
            }
        }

        if !won {
            continue;
        }

        if let Some(closed_at) = deal.closed_at {
            // Whole days; a close date before creation counts as zero.
            cycle_days_total += (closed_at - deal.created_at).num_days().max(0);
            cycle_samples += 1;
        }

        if let Some(owner) = deal.owner.as_deref().filter(|o| !o.is_empty()) {
            *reps.entry(owner) += deal.value;
        }
    }

    let mut best_niche: Option<(String, f64)> = None;
    for (name, tally) in &categories.entries {
        if tally.total <= MIN_CATEGORY_SAMPLE {
            continue;
        }
        let ratio = tally.won as f64 / tally.total as f64;
        if best_niche.as_ref().map_or(true, |(_, best)| ratio > *best) {
            best_niche = Some((name.clone(), ratio));
        }
    }

    let mut top_rep: Option<(String, f64)> = None;
    for (name, value) in &reps.entries {
        if top_rep.as_ref().map_or(true, |(_, best)| *value > *best) {
            top_rep = Some((name.clone(), *value));
        }
    }

    let sales_cycle = (cycle_samples > 0).then(|| SalesCycle {
        days: (cycle_days_total as f64 / cycle_samples as f64).round() as i64,
    });

    InsightReport {
        best_niche: best_niche.map(|(name, ratio)| BestNiche {
            name,
            rate: (ratio * 1000.0).round() / 10.0,
        }),
        sales_cycle,
        top_rep: top_rep.map(|(name, value)| TopRep { name, value }),
    }
}

pub struct InsightAggregator {
    source: Arc<dyn DealSource>,
}

impl InsightAggregator {
    pub fn new(source: Arc<dyn DealSource>) -> Self {
        Self { source }
    }

    /// Insights over the last `window_days` days.
    pub async fn insights(&self, window_days: u32) -> Result<InsightReport, InsightError> {
        self.insights_at(window_days, Utc::now()).await
    }

    /// Insights over `[now - window_days, now]`.
    pub async fn insights_at(
        &self,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<InsightReport, InsightError> {
        let since = now - Duration::days(i64::from(window_days));
        let deals = self.source.deals_created_between(since, now).await?;
        debug!(window_days, deals = deals.len(), "computing insights");
        Ok(compute_insights(&deals))
    }
}
