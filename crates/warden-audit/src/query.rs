//! Index selection, scanning and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use warden_storage::PrefixScanner;
use warden_storage::scan::DEFAULT_PAGE_SIZE;

use crate::error::AuditResult;
use crate::index::IndexMaintainer;
use crate::keys::{IndexScope, parse_index_suffix};
use crate::record::{AuditAction, AuditCategory, AuditRecord};

/// Default page size of a query.
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// Result ordering by timestamp, then id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Oldest first.
    Ascending,
    /// Newest first.
    #[default]
    Descending,
}

/// Predicates a record must satisfy. Unset fields match everything.
///
/// `since` and `until` are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    /// Acting user id.
    pub user_id: Option<String>,
    /// Acting username.
    pub username: Option<String>,
    /// Category.
    pub category: Option<AuditCategory>,
    /// Action.
    pub action: Option<AuditAction>,
    /// Resource kind.
    pub resource: Option<String>,
    /// Resource identifier.
    pub resource_id: Option<String>,
    /// Outcome.
    pub success: Option<bool>,
    /// Client address.
    pub ip_address: Option<String>,
    /// Lower time bound.
    pub since: Option<DateTime<Utc>>,
    /// Upper time bound.
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    /// Match everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only records by `user_id`.
    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Only records with this username.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Only records in `category`.
    #[must_use]
    pub fn category(mut self, category: impl Into<AuditCategory>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Only records of `action`.
    #[must_use]
    pub fn action(mut self, action: impl Into<AuditAction>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Only records about one specific resource.
    #[must_use]
    pub fn resource(mut self, resource: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self.resource_id = Some(id.into());
        self
    }

    /// Only successful (or only failed) actions.
    #[must_use]
    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    /// Only records from this client address.
    #[must_use]
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Only records at or after `ts`.
    #[must_use]
    pub fn since(mut self, ts: DateTime<Utc>) -> Self {
        self.since = Some(ts);
        self
    }

    /// Only records at or before `ts`.
    #[must_use]
    pub fn until(mut self, ts: DateTime<Utc>) -> Self {
        self.until = Some(ts);
        self
    }

    /// Whether `record` satisfies every predicate.
    #[must_use]
    pub fn matches(&self, record: &AuditRecord) -> bool {
        fn eq(want: Option<&String>, have: Option<&String>) -> bool {
            want.is_none_or(|w| have == Some(w))
        }

        eq(self.user_id.as_ref(), record.user_id.as_ref())
            && eq(self.username.as_ref(), record.username.as_ref())
            && eq(self.resource.as_ref(), record.resource.as_ref())
            && eq(self.resource_id.as_ref(), record.resource_id.as_ref())
            && eq(self.ip_address.as_ref(), record.ip_address.as_ref())
            && self.category.as_ref().is_none_or(|c| *c == record.category)
            && self.action.as_ref().is_none_or(|a| *a == record.action)
            && self.success.is_none_or(|s| s == record.success)
            && self.in_range(record.timestamp)
    }

    fn in_range(&self, ts: DateTime<Utc>) -> bool {
        self.since.is_none_or(|s| ts >= s) && self.until.is_none_or(|u| ts <= u)
    }

    /// The most selective index this filter can use.
    #[must_use]
    pub fn index_scope(&self) -> IndexScope {
        if let Some(user) = &self.user_id {
            return IndexScope::User(user.clone());
        }
        if let Some(category) = &self.category {
            return IndexScope::Category(category.as_str().to_owned());
        }
        if let (Some(resource), Some(resource_id)) = (&self.resource, &self.resource_id) {
            return IndexScope::Resource {
                resource: resource.clone(),
                resource_id: resource_id.clone(),
            };
        }
        IndexScope::Time
    }

    /// Whether every hit in `scope` that passes the time range also passes
    /// the rest of the filter, so a hit can be counted without reading it.
    fn covered_by(&self, scope: &IndexScope) -> bool {
        let residual_free = self.username.is_none()
            && self.action.is_none()
            && self.success.is_none()
            && self.ip_address.is_none();
        let user_ok = self.user_id.is_none() || matches!(scope, IndexScope::User(_));
        let category_ok = self.category.is_none() || matches!(scope, IndexScope::Category(_));
        let resource_ok = (self.resource.is_none() && self.resource_id.is_none())
            || matches!(scope, IndexScope::Resource { .. });
        residual_free && user_ok && category_ok && resource_ok
    }
}

/// A query request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Predicates.
    #[serde(default)]
    pub filter: AuditFilter,
    /// Maximum records returned.
    pub limit: usize,
    /// Matching records skipped before the page starts.
    #[serde(default)]
    pub offset: usize,
    /// Result order.
    #[serde(default)]
    pub sort: SortOrder,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            filter: AuditFilter::default(),
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
            sort: SortOrder::default(),
        }
    }
}

impl QueryOptions {
    /// Newest first, default limit, no filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: AuditFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Return at most `limit` records.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Skip the first `offset` matches.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set the order.
    #[must_use]
    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPage {
    /// Matching records in the requested order.
    pub entries: Vec<AuditRecord>,
    /// Number of records in this page.
    pub returned: usize,
    /// Whether at least one more match exists past this page.
    pub has_more: bool,
}

/// Plans and runs filtered queries over the secondary indexes.
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    maintainer: IndexMaintainer,
}

impl QueryPlanner {
    /// Planner reading through `maintainer`.
    #[must_use]
    pub fn new(maintainer: IndexMaintainer) -> Self {
        Self { maintainer }
    }

    /// Run `options` and return one page.
    ///
    /// Index hits whose record has been deleted meanwhile are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a record does not decode.
    #[instrument(skip_all, fields(limit = options.limit, offset = options.offset))]
    pub async fn query(&self, options: &QueryOptions) -> AuditResult<QueryPage> {
        let filter = &options.filter;
        let scope = filter.index_scope();
        let prefix = scope.prefix();
        let covered = filter.covered_by(&scope);
        let reverse = options.sort == SortOrder::Descending;
        let wanted = options.limit.saturating_add(1);
        let page_size = options
            .offset
            .saturating_add(wanted)
            .clamp(1, DEFAULT_PAGE_SIZE);

        let mut scanner = PrefixScanner::new(self.maintainer.store().as_ref(), prefix.as_str(), reverse)
            .with_page_size(page_size);
        let mut skipped = 0usize;
        let mut scanned = 0usize;
        let mut entries = Vec::new();

        while let Some(hit) = scanner.next().await? {
            scanned = scanned.saturating_add(1);
            let Some((ts, id)) = hit
                .key
                .strip_prefix(prefix.as_str())
                .and_then(parse_index_suffix)
            else {
                debug!(key = %hit.key, "Skipping malformed index key");
                continue;
            };

            // Keys are time-ordered within the scope: stop once past the range.
            let before = filter.since.is_some_and(|s| ts < s);
            let after = filter.until.is_some_and(|u| ts > u);
            if (reverse && before) || (!reverse && after) {
                break;
            }
            if before || after {
                continue;
            }

            if covered && skipped < options.offset {
                skipped = skipped.saturating_add(1);
                continue;
            }

            let Some(record) = self.maintainer.get(&id).await? else {
                continue;
            };
            if !filter.matches(&record) {
                continue;
            }
            if skipped < options.offset {
                skipped = skipped.saturating_add(1);
                continue;
            }

            entries.push(record);
            if entries.len() >= wanted {
                break;
            }
        }

        let has_more = entries.len() > options.limit;
        entries.truncate(options.limit);
        debug!(
            index = scope.name(),
            scanned,
            returned = entries.len(),
            has_more,
            "Audit query complete"
        );
        Ok(QueryPage {
            returned: entries.len(),
            entries,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};
    use warden_storage::MemoryKvStore;

    use super::*;
    use crate::encoder::EntryEncoder;
    use crate::record::AuditEvent;

    fn minute(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .unwrap()
            .checked_add_signed(Duration::minutes(n))
            .unwrap()
    }

    async fn seeded() -> (QueryPlanner, Vec<AuditRecord>) {
        let maintainer = IndexMaintainer::new(Arc::new(MemoryKvStore::new()));
        let encoder = EntryEncoder::default();
        let events = [
            AuditEvent::new(AuditCategory::Auth, AuditAction::Login).with_user("alice"),
            AuditEvent::new(AuditCategory::Auth, AuditAction::LoginFailed)
                .with_user("bob")
                .failed("bad password"),
            AuditEvent::new(AuditCategory::Data, AuditAction::Update)
                .with_user("alice")
                .with_resource("doc", "1"),
            AuditEvent::new(AuditCategory::Data, AuditAction::Read).with_resource("doc", "1"),
            AuditEvent::new(AuditCategory::System, AuditAction::Backup),
        ];
        let mut records = Vec::new();
        for (i, event) in events.into_iter().enumerate() {
            let record = encoder.encode(event.at(minute(i64::try_from(i).unwrap())));
            maintainer.commit(&record).await.unwrap();
            records.push(record);
        }
        (QueryPlanner::new(maintainer), records)
    }

    fn ids(page: &QueryPage) -> Vec<&str> {
        page.entries.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_index_priority() {
        let all = AuditFilter::new()
            .user("u")
            .category(AuditCategory::Auth)
            .resource("doc", "1");
        assert_eq!(all.index_scope(), IndexScope::User("u".into()));

        let no_user = AuditFilter::new().category(AuditCategory::Auth).resource("doc", "1");
        assert_eq!(no_user.index_scope(), IndexScope::Category("auth".into()));

        let half_resource = AuditFilter {
            resource: Some("doc".into()),
            ..AuditFilter::default()
        };
        assert_eq!(half_resource.index_scope(), IndexScope::Time);
    }

    #[tokio::test]
    async fn test_default_sort_is_newest_first() {
        let (planner, records) = seeded().await;
        let page = planner.query(&QueryOptions::new()).await.unwrap();
        assert_eq!(page.returned, 5);
        assert!(!page.has_more);
        assert_eq!(page.entries[0].id, records[4].id);
        assert_eq!(page.entries[4].id, records[0].id);
    }

    #[tokio::test]
    async fn test_user_index_with_residual_filter() {
        let (planner, records) = seeded().await;
        let options = QueryOptions::new()
            .with_filter(AuditFilter::new().user("alice").category(AuditCategory::Data));
        let page = planner.query(&options).await.unwrap();
        assert_eq!(ids(&page), vec![records[2].id.as_str()]);
    }

    #[tokio::test]
    async fn test_success_filter_on_time_index() {
        let (planner, records) = seeded().await;
        let options = QueryOptions::new().with_filter(AuditFilter::new().success(false));
        let page = planner.query(&options).await.unwrap();
        assert_eq!(ids(&page), vec![records[1].id.as_str()]);
    }

    #[tokio::test]
    async fn test_pagination_with_offset() {
        let (planner, records) = seeded().await;
        let options = QueryOptions::new()
            .sorted(SortOrder::Ascending)
            .with_limit(2)
            .with_offset(1);
        let page = planner.query(&options).await.unwrap();
        assert_eq!(
            ids(&page),
            vec![records[1].id.as_str(), records[2].id.as_str()]
        );
        assert!(page.has_more);

        let last = planner
            .query(&options.clone().with_offset(4))
            .await
            .unwrap();
        assert_eq!(last.returned, 1);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn test_offset_counts_only_matches() {
        let (planner, records) = seeded().await;
        let options = QueryOptions::new()
            .with_filter(AuditFilter::new().user("alice").action(AuditAction::Update))
            .with_offset(0);
        assert_eq!(ids(&planner.query(&options).await.unwrap()), vec![
            records[2].id.as_str()
        ]);

        let skipped = planner.query(&options.with_offset(1)).await.unwrap();
        assert!(skipped.entries.is_empty());
    }

    #[tokio::test]
    async fn test_time_range_is_inclusive_in_both_directions() {
        let (planner, records) = seeded().await;
        let filter = AuditFilter::new()
            .since(minute(1))
            .until(minute(3));

        for sort in [SortOrder::Ascending, SortOrder::Descending] {
            let page = planner
                .query(&QueryOptions::new().with_filter(filter.clone()).sorted(sort))
                .await
                .unwrap();
            let mut got = ids(&page);
            got.sort_unstable();
            let mut want: Vec<&str> = records[1..=3].iter().map(|r| r.id.as_str()).collect();
            want.sort_unstable();
            assert_eq!(got, want);
        }
    }

    #[tokio::test]
    async fn test_resource_index() {
        let (planner, records) = seeded().await;
        let options = QueryOptions::new()
            .sorted(SortOrder::Ascending)
            .with_filter(AuditFilter::new().resource("doc", "1"));
        let page = planner.query(&options).await.unwrap();
        assert_eq!(
            ids(&page),
            vec![records[2].id.as_str(), records[3].id.as_str()]
        );
    }

    #[tokio::test]
    async fn test_vanished_records_are_skipped() {
        let (planner, records) = seeded().await;
        // Leave the index entries behind, drop only the primary record.
        let mut tx = warden_storage::Transaction::new();
        tx.delete(crate::keys::entry_key(&records[4].id));
        planner.maintainer.store().commit(tx).await.unwrap();

        let page = planner.query(&QueryOptions::new()).await.unwrap();
        assert_eq!(page.returned, 4);
        assert_eq!(page.entries[0].id, records[3].id);
    }

    #[tokio::test]
    async fn test_zero_limit_reports_has_more() {
        let (planner, _) = seeded().await;
        let page = planner.query(&QueryOptions::new().with_limit(0)).await.unwrap();
        assert!(page.entries.is_empty());
        assert!(page.has_more);
    }
}
