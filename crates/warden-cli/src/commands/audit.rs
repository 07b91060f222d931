//! Audit commands - record, inspect and prune audit events.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde_json::{Map, Value};
use warden_audit::{
    AuditAction, AuditCategory, AuditEvent, AuditFilter, AuditRecord, AuditStore, QueryOptions,
    RecordId, SortOrder,
};

use crate::formatter::{OutputFormat, print_json};
use crate::theme::Theme;

/// Arguments of `warden log`.
#[derive(Debug, Default)]
pub(crate) struct LogArgs {
    pub(crate) category: String,
    pub(crate) action: String,
    pub(crate) user: Option<String>,
    pub(crate) username: Option<String>,
    pub(crate) ip: Option<String>,
    pub(crate) resource: Option<String>,
    pub(crate) resource_id: Option<String>,
    pub(crate) details: Vec<String>,
    pub(crate) failed: Option<String>,
}

/// Arguments of `warden query`.
#[derive(Debug, Default)]
pub(crate) struct QueryArgs {
    pub(crate) user: Option<String>,
    pub(crate) username: Option<String>,
    pub(crate) category: Option<String>,
    pub(crate) action: Option<String>,
    pub(crate) resource: Option<String>,
    pub(crate) resource_id: Option<String>,
    pub(crate) success: Option<bool>,
    pub(crate) ip: Option<String>,
    pub(crate) since: Option<String>,
    pub(crate) until: Option<String>,
    pub(crate) limit: usize,
    pub(crate) offset: usize,
    pub(crate) oldest_first: bool,
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type,
/// anything else is stored as a string.
pub(crate) fn parse_details(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut details = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("detail '{pair}' is not in key=value form");
        };
        if key.is_empty() {
            bail!("detail '{pair}' has an empty key");
        }
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        details.insert(key.to_owned(), value);
    }
    Ok(details)
}

fn parse_time(flag: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("--{flag} expects an RFC 3339 timestamp, got '{raw}'"))
}

/// Build the event described by `args`.
pub(crate) fn build_event(args: LogArgs) -> Result<AuditEvent> {
    let mut event = AuditEvent::new(
        AuditCategory::parse(&args.category),
        AuditAction::parse(&args.action),
    )
    .with_details(parse_details(&args.details)?);

    if let Some(user) = args.user {
        event = event.with_user(user);
    }
    if let Some(username) = args.username {
        event = event.with_username(username);
    }
    if let Some(ip) = args.ip {
        event = event.with_ip(ip);
    }
    match (args.resource, args.resource_id) {
        (Some(resource), Some(id)) => event = event.with_resource(resource, id),
        (None, None) => {},
        _ => bail!("--resource and --resource-id must be given together"),
    }
    if let Some(message) = args.failed {
        event = event.failed(message);
    }
    Ok(event)
}

/// Build the query described by `args`.
pub(crate) fn build_query(args: QueryArgs) -> Result<QueryOptions> {
    let mut filter = AuditFilter::new();
    if let Some(user) = args.user {
        filter = filter.user(user);
    }
    if let Some(username) = args.username {
        filter = filter.username(username);
    }
    if let Some(category) = args.category {
        filter = filter.category(AuditCategory::parse(&category));
    }
    if let Some(action) = args.action {
        filter = filter.action(AuditAction::parse(&action));
    }
    match (args.resource, args.resource_id) {
        (Some(resource), Some(id)) => filter = filter.resource(resource, id),
        (None, None) => {},
        _ => bail!("--resource and --resource-id must be given together"),
    }
    if let Some(success) = args.success {
        filter = filter.success(success);
    }
    if let Some(ip) = args.ip {
        filter = filter.ip(ip);
    }
    if let Some(since) = args.since {
        filter = filter.since(parse_time("since", &since)?);
    }
    if let Some(until) = args.until {
        filter = filter.until(parse_time("until", &until)?);
    }

    let sort = if args.oldest_first {
        SortOrder::Ascending
    } else {
        SortOrder::Descending
    };
    Ok(QueryOptions::new()
        .with_filter(filter)
        .with_limit(args.limit)
        .with_offset(args.offset)
        .sorted(sort))
}

/// Notes for a category or action outside the built-in vocabulary.
/// Such values are stored as given.
pub(crate) fn vocabulary_warnings(event: &AuditEvent) -> Vec<String> {
    let mut warnings = Vec::new();
    if !event.category.is_known() {
        warnings.push(format!("'{}' is not a built-in category", event.category));
    }
    if !event.action.is_known() {
        warnings.push(format!("'{}' is not a built-in action", event.action));
    }
    warnings
}

/// `warden log`.
pub(crate) async fn log_event(
    store: &AuditStore,
    args: LogArgs,
    format: OutputFormat,
) -> Result<()> {
    let event = build_event(args)?;
    let warnings = vocabulary_warnings(&event);
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    let id = store.log(event).await?;
    store.flush().await?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "id": id, "warnings": warnings }));
    }
    for warning in &warnings {
        println!("{}", Theme::warning(warning));
    }
    println!("{}", Theme::success(&format!("Recorded {id}")));
    Ok(())
}

/// `warden get`.
pub(crate) async fn show_record(store: &AuditStore, id: &str, format: OutputFormat) -> Result<()> {
    let Some(record) = store.get_by_id(&RecordId::from(id)).await? else {
        bail!("no audit record with id {id}");
    };

    if format == OutputFormat::Json {
        return print_json(&record);
    }

    println!("\n{}", Theme::header(&format!("Audit Record: {}", record.description())));
    println!("{}", Theme::kv("id", record.id.as_str()));
    println!("{}", Theme::kv("timestamp", &record.timestamp.to_rfc3339()));
    println!("{}", Theme::kv("category", record.category.as_str()));
    println!("{}", Theme::kv("action", record.action.as_str()));
    println!("{}", Theme::kv("outcome", &Theme::outcome(record.success)));
    if let Some(user) = &record.user_id {
        println!("{}", Theme::kv("user", user));
    }
    if let Some(name) = &record.username {
        println!("{}", Theme::kv("username", name));
    }
    if let Some(ip) = &record.ip_address {
        println!("{}", Theme::kv("ip", ip));
    }
    if let Some((resource, resource_id)) = record.resource_ref() {
        println!("{}", Theme::kv("resource", &format!("{resource}/{resource_id}")));
    }
    if let Some(message) = &record.error {
        println!("{}", Theme::kv("error", message));
    }
    if !record.details.is_empty() {
        println!("{}", Theme::kv("details", &Value::Object(record.details.clone()).to_string()));
    }
    for change in &record.changes {
        println!(
            "{}",
            Theme::kv(
                "change",
                &format!(
                    "{}: {} -> {}",
                    change.field,
                    change.old_value.as_ref().map_or_else(|| "-".to_owned(), Value::to_string),
                    change.new_value.as_ref().map_or_else(|| "-".to_owned(), Value::to_string),
                )
            )
        );
    }
    println!();
    Ok(())
}

fn print_row(record: &AuditRecord) {
    let user = record
        .username
        .as_deref()
        .or(record.user_id.as_deref())
        .unwrap_or("-");
    println!(
        "{:<10} {:<20} {:<10} {:<20} {:<16} {}",
        Theme::record_id(record.id.as_str()),
        Theme::timestamp(&record.timestamp),
        record.category.as_str(),
        record.action.as_str(),
        user,
        Theme::outcome(record.success),
    );
}

/// `warden query`.
pub(crate) async fn run_query(
    store: &AuditStore,
    args: QueryArgs,
    format: OutputFormat,
) -> Result<()> {
    let page = store.query(&build_query(args)?).await?;

    if format == OutputFormat::Json {
        return print_json(&page);
    }
    if page.entries.is_empty() {
        println!("{}", Theme::info("No matching audit records"));
        return Ok(());
    }

    println!("\n{}", Theme::header("Audit Records"));
    println!(
        "{:<10} {:<20} {:<10} {:<20} {:<16} {}",
        "ID".dimmed(),
        "TIMESTAMP".dimmed(),
        "CATEGORY".dimmed(),
        "ACTION".dimmed(),
        "USER".dimmed(),
        "RESULT".dimmed()
    );
    println!("{}", Theme::separator());
    for record in &page.entries {
        print_row(record);
    }
    println!();
    if page.has_more {
        println!("{}", Theme::info(&format!("{} shown, more available", page.returned)));
    } else {
        println!("{}", Theme::info(&format!("{} shown", page.returned)));
    }
    Ok(())
}

/// `warden stats`.
pub(crate) async fn show_stats(store: &AuditStore, format: OutputFormat) -> Result<()> {
    let stats = store.get_stats().await?;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    println!("\n{}", Theme::header("Audit Statistics"));
    println!("{}", Theme::kv("total", &stats.total_entries.to_string()));
    println!("{}", Theme::kv("failures", &stats.recent_failures.to_string()));
    if let Some(oldest) = &stats.oldest_timestamp {
        println!("{}", Theme::kv("oldest", &oldest.to_rfc3339()));
    }
    if let Some(newest) = &stats.newest_timestamp {
        println!("{}", Theme::kv("newest", &newest.to_rfc3339()));
    }
    if !stats.entries_by_category.is_empty() {
        println!("\n  {}", "By category".bold());
        for (category, count) in &stats.entries_by_category {
            println!("    {category:<20} {count}");
        }
    }
    if !stats.entries_by_action.is_empty() {
        println!("\n  {}", "By action".bold());
        for (action, count) in &stats.entries_by_action {
            println!("    {action:<20} {count}");
        }
    }
    println!();
    Ok(())
}

/// `warden prune`.
pub(crate) async fn prune(store: &AuditStore, format: OutputFormat) -> Result<()> {
    let report = store.apply_retention().await?;

    if format == OutputFormat::Json {
        return print_json(&report);
    }
    if report.deleted == 0 {
        println!("{}", Theme::info(&format!("Nothing to prune ({} retained)", report.retained)));
    } else {
        println!(
            "{}",
            Theme::success(&format!(
                "Pruned {} record(s), {} retained",
                report.deleted, report.retained
            ))
        );
    }
    Ok(())
}

/// `warden delete`.
pub(crate) async fn delete(store: &AuditStore, id: &str, format: OutputFormat) -> Result<()> {
    let deleted = store.delete(&RecordId::from(id)).await?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "id": id, "deleted": deleted }));
    }
    if deleted {
        println!("{}", Theme::success(&format!("Deleted {id}")));
    } else {
        println!("{}", Theme::warning(&format!("No audit record with id {id}")));
    }
    Ok(())
}

/// `warden rebuild-stats`.
pub(crate) async fn rebuild_stats(store: &AuditStore, format: OutputFormat) -> Result<()> {
    let stats = store.rebuild_stats().await?;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }
    println!(
        "{}",
        Theme::success(&format!(
            "Statistics rebuilt from {} record(s)",
            stats.total_entries
        ))
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_vocabulary_is_flagged() {
        let known = AuditEvent::new(AuditCategory::Auth, AuditAction::Login);
        assert!(vocabulary_warnings(&known).is_empty());

        let custom = AuditEvent::new(AuditCategory::parse("billing"), AuditAction::parse("refund"));
        let warnings = vocabulary_warnings(&custom);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("billing"));
        assert!(warnings[1].contains("refund"));
    }

    #[test]
    fn test_details_keep_json_types() {
        let details = parse_details(&[
            "count=3".into(),
            "name=alice".into(),
            "flags=[1,2]".into(),
        ])
        .unwrap();
        assert_eq!(details["count"], 3);
        assert_eq!(details["name"], "alice");
        assert!(details["flags"].is_array());
    }

    #[test]
    fn test_details_reject_malformed_pairs() {
        assert!(parse_details(&["novalue".into()]).is_err());
        assert!(parse_details(&["=x".into()]).is_err());
    }

    #[test]
    fn test_event_requires_resource_pair() {
        let args = LogArgs {
            category: "data".into(),
            action: "update".into(),
            resource: Some("document".into()),
            ..LogArgs::default()
        };
        assert!(build_event(args).is_err());
    }

    #[test]
    fn test_event_from_args() {
        let args = LogArgs {
            category: "auth".into(),
            action: "login".into(),
            user: Some("u1".into()),
            failed: Some("bad password".into()),
            details: vec!["attempt=2".into()],
            ..LogArgs::default()
        };
        let event = build_event(args).unwrap();
        assert_eq!(event.category, AuditCategory::Auth);
        assert_eq!(event.action, AuditAction::Login);
        assert_eq!(event.user_id.as_deref(), Some("u1"));
        assert!(!event.success);
        assert_eq!(event.details["attempt"], 2);
    }

    #[test]
    fn test_query_parses_time_bounds() {
        let args = QueryArgs {
            since: Some("2024-01-01T00:00:00Z".into()),
            limit: 10,
            oldest_first: true,
            ..QueryArgs::default()
        };
        let options = build_query(args).unwrap();
        assert!(options.filter.since.is_some());
        assert_eq!(options.limit, 10);
        assert_eq!(options.sort, SortOrder::Ascending);

        let bad = QueryArgs {
            until: Some("yesterday".into()),
            ..QueryArgs::default()
        };
        assert!(build_query(bad).is_err());
    }
}
