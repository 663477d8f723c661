//! Notification rules - when a recurring digest fires and which items it leaves out.
//!
//! A rule is keyed by its topic (`task`, `audience`). The external trigger calls
//! [`NotificationRuleScheduler::run_tick`] every few minutes; a rule fires when its
//! local send time falls inside the tick window. Digests carry per-(rule, day,
//! recipient) dedup keys, so overlapping ticks cannot send twice.

use crate::{
    config::settings::parse_timezone,
    core::{
        dispatch::{
            AlertDispatcher, Delivery, DispatchReport, SYSTEM_SENDER, digest_dedup_key,
            intervention_lines, renewal_lines,
        },
        intervention::invoice_due,
        message::{InterventionLine, RenewalLine},
        renewal::open_renewal_items,
    },
    entities::{
        NotificationRule, OperatorModel,
        enums::{Audience, Frequency, NotificationTask, RuleMode},
        intervention, notification_rule, renewal_item,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use sea_orm::{DatabaseConnection, QueryOrder, Set, prelude::*};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Something a rule can report on
pub trait Schedulable {
    /// Status compared against the rule's stop statuses
    fn status(&self) -> String;
    /// Date compared against today for `only_future` rules
    fn relevant_date(&self) -> NaiveDate;
}

impl Schedulable for intervention::Model {
    fn status(&self) -> String {
        self.status_label()
    }

    fn relevant_date(&self) -> NaiveDate {
        self.performed_on
    }
}

impl Schedulable for renewal_item::Model {
    fn status(&self) -> String {
        self.status_label()
    }

    fn relevant_date(&self) -> NaiveDate {
        self.due_on
    }
}

fn local_now(rule: &notification_rule::Model, now: DateTime<Utc>) -> Option<DateTime<Tz>> {
    match parse_timezone(&rule.timezone) {
        Ok(tz) => Some(now.with_timezone(&tz)),
        Err(e) => {
            warn!(rule_id = rule.id, error = %e, "Rule has an unusable timezone");
            None
        }
    }
}

/// ISO weekday check; a stored 0 is read as Sunday.
#[must_use]
pub fn day_matches(frequency: Frequency, day_of_week: Option<i32>, weekday: Weekday) -> bool {
    let iso = i32::try_from(weekday.number_from_monday()).unwrap_or_default();
    match frequency {
        Frequency::Daily => true,
        Frequency::Weekdays => iso <= 5,
        Frequency::Weekly => day_of_week.map(|d| if d == 0 { 7 } else { d }) == Some(iso),
    }
}

/// True when `now`, read in the rule's timezone, lies in `[send_time, send_time + granularity)`
/// on a day the rule's frequency allows.
#[must_use]
pub fn should_fire_now(
    rule: &notification_rule::Model,
    now: DateTime<Utc>,
    granularity: chrono::Duration,
) -> bool {
    if !rule.enabled {
        return false;
    }
    let Some(local) = local_now(rule, now) else {
        return false;
    };

    let elapsed = local.time().signed_duration_since(rule.send_time);
    elapsed >= chrono::Duration::zero()
        && elapsed < granularity
        && day_matches(rule.frequency, rule.day_of_week, local.weekday())
}

/// Whether the rule leaves `item` out of its digest.
#[must_use]
pub fn is_suppressed(
    rule: &notification_rule::Model,
    item: &impl Schedulable,
    now: DateTime<Utc>,
) -> bool {
    let status = item.status().to_ascii_uppercase();
    if rule.stop_status_list().contains(&status) {
        return true;
    }

    let today = local_now(rule, now).map_or_else(|| now.date_naive(), |l| l.date_naive());
    rule.only_future && item.relevant_date() < today
}

/// Settings of a rule as an administrator edits them
#[derive(Debug, Clone)]
pub struct NewRule {
    /// What the rule reports on
    pub task: NotificationTask,
    /// Who it reports to
    pub audience: Audience,
    /// Disabled rules never fire on ticks
    pub enabled: bool,
    /// Tick-driven or on demand only
    pub mode: RuleMode,
    /// Explicit operator ids; empty means every eligible operator
    pub recipients: Vec<i64>,
    /// Days the rule fires on
    pub frequency: Frequency,
    /// Local time of day in `timezone`
    pub send_time: NaiveTime,
    /// IANA timezone name
    pub timezone: String,
    /// Required for WEEKLY rules, 0 or 7 is Sunday
    pub day_of_week: Option<i32>,
    /// Item statuses that silence the rule
    pub stop_statuses: Vec<String>,
    /// Skip items whose date is already past
    pub only_future: bool,
}

impl NewRule {
    fn validate(&self) -> Result<()> {
        parse_timezone(&self.timezone)
            .map_err(|_| Error::validation(format!("Unknown timezone '{}'", self.timezone)))?;
        match (self.frequency, self.day_of_week) {
            (Frequency::Weekly, None) => {
                Err(Error::validation("Weekly rules need a day of the week"))
            }
            (_, Some(day)) if !(0..=7).contains(&day) => Err(Error::validation(format!(
                "Day of week must be 1 (Monday) to 7 (Sunday), got {day}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Creates the rule for the topic or replaces its settings. Alert history is untouched.
#[instrument(skip(db, rule), fields(task = %rule.task, audience = %rule.audience))]
pub async fn upsert_rule<C>(
    db: &C,
    rule: NewRule,
    now: DateTime<Utc>,
) -> Result<notification_rule::Model>
where
    C: ConnectionTrait,
{
    rule.validate()?;

    let existing = find_rule(db, rule.task, rule.audience).await?;
    let mut model = existing
        .clone()
        .map_or_else(<notification_rule::ActiveModel as Default>::default, Into::into);
    model.task = Set(rule.task);
    model.audience = Set(rule.audience);
    model.enabled = Set(rule.enabled);
    model.mode = Set(rule.mode);
    model.recipients = Set(rule
        .recipients
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(","));
    model.frequency = Set(rule.frequency);
    model.send_time = Set(rule.send_time);
    model.timezone = Set(rule.timezone);
    model.day_of_week = Set(rule.day_of_week);
    model.stop_statuses = Set(rule
        .stop_statuses
        .iter()
        .map(|s| s.trim().to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(","));
    model.only_future = Set(rule.only_future);
    model.updated_at = Set(now);

    let saved = if existing.is_some() {
        model.update(db).await?
    } else {
        model.insert(db).await?
    };
    info!(rule_id = saved.id, "Notification rule saved");
    Ok(saved)
}

/// Loads a rule or reports it missing.
pub async fn get_rule<C>(db: &C, rule_id: i64) -> Result<notification_rule::Model>
where
    C: ConnectionTrait,
{
    NotificationRule::find_by_id(rule_id)
        .one(db)
        .await?
        .ok_or(Error::NotFound {
            entity: "notification rule",
            id: rule_id,
        })
}

/// The rule of a topic, if one was saved.
pub async fn find_rule<C>(
    db: &C,
    task: NotificationTask,
    audience: Audience,
) -> Result<Option<notification_rule::Model>>
where
    C: ConnectionTrait,
{
    NotificationRule::find()
        .filter(notification_rule::Column::Task.eq(task))
        .filter(notification_rule::Column::Audience.eq(audience))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Every rule, ordered by topic.
pub async fn list_rules<C>(db: &C) -> Result<Vec<notification_rule::Model>>
where
    C: ConnectionTrait,
{
    NotificationRule::find()
        .order_by_asc(notification_rule::Column::Task)
        .order_by_asc(notification_rule::Column::Audience)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Items a rule reports on, after suppression
enum Pending {
    Interventions(Vec<InterventionLine>),
    Renewals(Vec<RenewalLine>),
}

impl Pending {
    fn for_client(&self, client_id: Option<i64>) -> Self {
        let keep = |owner: i64| client_id.is_none_or(|c| c == owner);
        match self {
            Self::Interventions(lines) => Self::Interventions(
                lines.iter().filter(|l| keep(l.client_id)).cloned().collect(),
            ),
            Self::Renewals(lines) => {
                Self::Renewals(lines.iter().filter(|l| keep(l.client_id)).cloned().collect())
            }
        }
    }
}

/// Outcome of one scheduler tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Rules whose window contained the tick
    pub rules_fired: usize,
    /// Digests delivered
    pub sent: usize,
    /// Digests already sent today
    pub skipped: usize,
    /// Rules whose run ended in an error; the error is logged
    pub failed: usize,
}

/// Evaluates notification rules and sends their digests.
pub struct NotificationRuleScheduler {
    dispatcher: Arc<AlertDispatcher>,
    granularity: chrono::Duration,
}

impl NotificationRuleScheduler {
    /// Scheduler firing rules whose send time falls in a `granularity` wide window.
    #[must_use]
    pub const fn new(dispatcher: Arc<AlertDispatcher>, granularity: chrono::Duration) -> Self {
        Self {
            dispatcher,
            granularity,
        }
    }

    /// Runs every enabled AUTOMATIC rule whose window contains `now`.
    #[instrument(skip(self, db))]
    pub async fn run_tick(&self, db: &DatabaseConnection, now: DateTime<Utc>) -> Result<TickReport> {
        let rules = NotificationRule::find()
            .filter(notification_rule::Column::Enabled.eq(true))
            .filter(notification_rule::Column::Mode.eq(RuleMode::Automatic))
            .order_by_asc(notification_rule::Column::Id)
            .all(db)
            .await?;

        let mut report = TickReport::default();
        for rule in rules
            .iter()
            .filter(|r| should_fire_now(r, now, self.granularity))
        {
            report.rules_fired += 1;
            match self.fire(db, rule, now).await {
                Ok(sent) => {
                    report.sent += sent.sent;
                    report.skipped += sent.skipped;
                }
                Err(e) => {
                    error!(rule_id = rule.id, error = %e, "Scheduled rule failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            rules_fired = report.rules_fired,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "Scheduler tick complete"
        );
        Ok(report)
    }

    /// Sends the rule's digest right away, regardless of its schedule or mode.
    /// Shares the per-day ledger with ticks, so a recipient already served today
    /// is skipped. Returns the number of messages sent.
    #[instrument(skip(self, db))]
    pub async fn trigger_now(
        &self,
        db: &DatabaseConnection,
        rule_id: i64,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let rule = get_rule(db, rule_id).await?;
        Ok(self.fire(db, &rule, now).await?.sent)
    }

    async fn pending(
        &self,
        db: &DatabaseConnection,
        rule: &notification_rule::Model,
        now: DateTime<Utc>,
    ) -> Result<Pending> {
        Ok(match rule.task {
            NotificationTask::InvoiceDue => {
                let due: Vec<_> = invoice_due(db)
                    .await?
                    .into_iter()
                    .filter(|i| !is_suppressed(rule, i, now))
                    .collect();
                Pending::Interventions(intervention_lines(db, &due).await?)
            }
            NotificationTask::RenewalReminder => {
                let open: Vec<_> = open_renewal_items(db)
                    .await?
                    .into_iter()
                    .filter(|i| !is_suppressed(rule, i, now))
                    .collect();
                Pending::Renewals(renewal_lines(db, &open).await?)
            }
        })
    }

    async fn recipients(&self, rule: &notification_rule::Model) -> Result<Vec<OperatorModel>> {
        let explicit = rule.recipient_ids();
        let operators = if explicit.is_empty() {
            self.dispatcher
                .eligible_recipients(rule.task.channel(), None)
                .await?
        } else {
            let mut found = Vec::with_capacity(explicit.len());
            for id in explicit {
                match self.dispatcher.directory().get(id).await? {
                    Some(op) if op.active => found.push(op),
                    _ => warn!(rule_id = rule.id, operator_id = id, "Rule recipient is not an active operator"),
                }
            }
            found
        };

        Ok(match rule.audience {
            Audience::Staff => operators,
            Audience::Client => operators
                .into_iter()
                .filter(|op| op.client_id.is_some())
                .collect(),
        })
    }

    async fn fire(
        &self,
        db: &DatabaseConnection,
        rule: &notification_rule::Model,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport> {
        let tz = parse_timezone(&rule.timezone)?;
        let today = now.with_timezone(&tz).date_naive();
        let channel = rule.task.channel();
        let pending = self.pending(db, rule, now).await?;
        let recipients = self.recipients(rule).await?;

        let mut report = DispatchReport::default();
        for operator in recipients {
            let scope = match rule.audience {
                Audience::Staff => None,
                Audience::Client => operator.client_id,
            };
            let digest = match pending.for_client(scope) {
                Pending::Interventions(lines) => self.dispatcher.invoice_due_digest_of(lines)?,
                Pending::Renewals(lines) => self.dispatcher.renewal_digest_of(&lines)?,
            };
            let Some(digest) = digest else {
                debug!(rule_id = rule.id, operator_id = operator.id, "Nothing pending for recipient");
                continue;
            };

            let delivery = Delivery {
                channel,
                entity_id: None,
                related_ids: digest.entity_ids,
                dedup_key: Some(digest_dedup_key(channel, rule.id, today, &operator.email)),
                recipients: vec![operator.email],
                sender: SYSTEM_SENDER.to_string(),
                message: digest.message,
                send_email: true,
            };
            if self.dispatcher.deliver(db, &delivery).await? {
                report.sent += 1;
            } else {
                report.skipped += 1;
            }
        }

        debug!(rule_id = rule.id, sent = report.sent, skipped = report.skipped, "Rule fired");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::enums::{InterventionOutcome, OperatorRole, RenewalStage};
    use crate::test_utils::*;
    use chrono::TimeZone;

    fn rule(frequency: Frequency, day_of_week: Option<i32>) -> notification_rule::Model {
        notification_rule::Model {
            id: 1,
            task: NotificationTask::InvoiceDue,
            audience: Audience::Staff,
            enabled: true,
            mode: RuleMode::Automatic,
            recipients: String::new(),
            frequency,
            send_time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            timezone: "Europe/Rome".to_string(),
            day_of_week,
            stop_statuses: String::new(),
            only_future: false,
            updated_at: Utc::now(),
        }
    }

    // Rome is UTC+2 in October 2026; the 19th is a Monday
    fn utc(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, hour, minute, 0).unwrap()
    }

    fn manual_rule() -> NewRule {
        let mut manual = test_new_rule(NotificationTask::InvoiceDue);
        manual.mode = RuleMode::Manual;
        manual
    }

    #[test]
    fn test_weekly_rule_fires_on_its_day_and_time_only() {
        let weekly = rule(Frequency::Weekly, Some(1));
        let five = chrono::Duration::minutes(5);

        assert!(should_fire_now(&weekly, utc(19, 5, 30), five));
        assert!(should_fire_now(&weekly, utc(19, 5, 34), five));
        assert!(!should_fire_now(&weekly, utc(19, 5, 35), five));
        assert!(!should_fire_now(&weekly, utc(19, 5, 29), five));
        // Tuesday 07:30
        assert!(!should_fire_now(&weekly, utc(20, 5, 30), five));
        // Monday 08:00
        assert!(!should_fire_now(&weekly, utc(19, 6, 0), five));
    }

    #[test]
    fn test_disabled_rule_never_fires() {
        let mut daily = rule(Frequency::Daily, None);
        daily.enabled = false;
        assert!(!should_fire_now(&daily, utc(19, 5, 30), chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_weekdays_skip_weekend() {
        let weekdays = rule(Frequency::Weekdays, None);
        let five = chrono::Duration::minutes(5);
        assert!(should_fire_now(&weekdays, utc(16, 5, 30), five));
        assert!(!should_fire_now(&weekdays, utc(17, 5, 30), five));
        assert!(!should_fire_now(&weekdays, utc(18, 5, 30), five));
    }

    #[test]
    fn test_day_matches_reads_zero_as_sunday() {
        assert!(day_matches(Frequency::Weekly, Some(0), Weekday::Sun));
        assert!(day_matches(Frequency::Weekly, Some(7), Weekday::Sun));
        assert!(!day_matches(Frequency::Weekly, None, Weekday::Sun));
        assert!(day_matches(Frequency::Daily, None, Weekday::Sat));
    }

    #[tokio::test]
    async fn test_suppression_by_status_and_date() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_renewal(&db, 1).await?;
        let now = utc(19, 5, 30);

        let mut r = rule(Frequency::Daily, None);
        assert!(!is_suppressed(&r, &item, now));

        r.stop_statuses = "confirmed, to_notify".to_string();
        assert!(is_suppressed(&r, &item, now));

        r.stop_statuses = String::new();
        r.only_future = true;
        let overdue = renewal_item::Model {
            due_on: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            ..item.clone()
        };
        assert!(is_suppressed(&r, &overdue, now));
        let due_today = renewal_item::Model {
            due_on: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            ..item
        };
        assert!(!is_suppressed(&r, &due_today, now));
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_rule_keeps_one_rule_per_topic() -> Result<()> {
        let db = setup_test_db().await?;
        let first = upsert_rule(&db, test_new_rule(NotificationTask::InvoiceDue), Utc::now()).await?;

        let mut edited = test_new_rule(NotificationTask::InvoiceDue);
        edited.frequency = Frequency::Weekly;
        edited.day_of_week = Some(1);
        edited.stop_statuses = vec!["invoiced".to_string()];
        let second = upsert_rule(&db, edited, Utc::now()).await?;

        assert_eq!(first.id, second.id);
        assert_eq!(second.frequency, Frequency::Weekly);
        assert_eq!(second.stop_statuses, "INVOICED");
        assert_eq!(list_rules(&db).await?.len(), 1);
        assert_eq!(get_rule(&db, first.id).await?, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_rule_validation() -> Result<()> {
        let db = setup_test_db().await?;
        let mut weekly = test_new_rule(NotificationTask::RenewalReminder);
        weekly.frequency = Frequency::Weekly;
        let result = upsert_rule(&db, weekly, Utc::now()).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let mut bad_tz = test_new_rule(NotificationTask::RenewalReminder);
        bad_tz.timezone = "Mars/Olympus".to_string();
        let result = upsert_rule(&db, bad_tz, Utc::now()).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        assert!(list_rules(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_tick_is_idempotent_within_the_day() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_operator(&db, "Admin", OperatorRole::Administration).await?;
        let (contract, site) = create_test_contract(&db, None).await?;
        let created = create_test_intervention(&db, contract.id, site.id, true).await?;
        close_test_intervention(&db, created.intervention.id).await?;
        upsert_rule(&db, test_new_rule(NotificationTask::InvoiceDue), Utc::now()).await?;

        let transport = RecordingTransport::default();
        let scheduler = test_scheduler(&db, &transport, test_clock());
        let now = utc(19, 5, 31);

        let first = scheduler.run_tick(&db, now).await?;
        assert_eq!(first.rules_fired, 1);
        assert_eq!(first.sent, 1);

        let again = scheduler.run_tick(&db, now).await?;
        assert_eq!(again.sent, 0);
        assert_eq!(again.skipped, 1);
        assert_eq!(transport.sent().len(), 1);

        let outside = scheduler.run_tick(&db, utc(19, 9, 0)).await?;
        assert_eq!(outside.rules_fired, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_tick_ignores_manual_rules() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_operator(&db, "Admin", OperatorRole::Administration).await?;
        create_test_renewal(&db, 1).await?;
        let mut manual = test_new_rule(NotificationTask::RenewalReminder);
        manual.mode = RuleMode::Manual;
        let saved = upsert_rule(&db, manual, Utc::now()).await?;

        let transport = RecordingTransport::default();
        let scheduler = test_scheduler(&db, &transport, test_clock());
        let report = scheduler.run_tick(&db, utc(19, 5, 31)).await?;
        assert_eq!(report.rules_fired, 0);

        assert_eq!(scheduler.trigger_now(&db, saved.id, utc(19, 12, 0)).await?, 1);
        assert_eq!(transport.sent().len(), 1);
        assert!(transport.sent()[0].subject.contains("1 renewal(s)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_trigger_now_sends_once_per_day_and_honours_suppression() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_operator(&db, "Admin", OperatorRole::Administration).await?;
        let (contract, site) = create_test_contract(&db, None).await?;
        let created = create_test_intervention(&db, contract.id, site.id, false).await?;
        close_test_intervention(&db, created.intervention.id).await?;
        let saved = upsert_rule(&db, manual_rule(), Utc::now()).await?;

        let transport = RecordingTransport::default();
        let scheduler = test_scheduler(&db, &transport, test_clock());
        let now = utc(19, 12, 0);
        assert_eq!(scheduler.trigger_now(&db, saved.id, now).await?, 1);
        assert_eq!(scheduler.trigger_now(&db, saved.id, now).await?, 0);
        assert_eq!(scheduler.trigger_now(&db, saved.id, utc(19, 18, 0)).await?, 0);
        assert_eq!(transport.sent().len(), 1);

        // A new local day opens a new slot
        let tomorrow = utc(20, 12, 0);
        let mut silenced = manual_rule();
        silenced.stop_statuses = vec![InterventionOutcome::ToInvoice.to_string()];
        upsert_rule(&db, silenced, Utc::now()).await?;
        assert_eq!(scheduler.trigger_now(&db, saved.id, tomorrow).await?, 0);

        upsert_rule(&db, manual_rule(), Utc::now()).await?;
        assert_eq!(scheduler.trigger_now(&db, saved.id, tomorrow).await?, 1);
        assert_eq!(transport.sent().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_trigger_now_and_tick_share_the_daily_slot() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_operator(&db, "Admin", OperatorRole::Administration).await?;
        let (contract, site) = create_test_contract(&db, None).await?;
        let created = create_test_intervention(&db, contract.id, site.id, false).await?;
        close_test_intervention(&db, created.intervention.id).await?;
        let saved = upsert_rule(&db, test_new_rule(NotificationTask::InvoiceDue), Utc::now()).await?;

        let transport = RecordingTransport::default();
        let scheduler = test_scheduler(&db, &transport, test_clock());
        assert_eq!(scheduler.trigger_now(&db, saved.id, utc(19, 5, 0)).await?, 1);

        let tick = scheduler.run_tick(&db, utc(19, 5, 31)).await?;
        assert_eq!(tick.rules_fired, 1);
        assert_eq!(tick.sent, 0);
        assert_eq!(tick.skipped, 1);
        assert_eq!(transport.sent().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_client_audience_sees_only_its_items() -> Result<()> {
        let db = setup_test_db().await?;
        let contact = create_test_operator(&db, "Contact", OperatorRole::Sales).await?;
        assign_operator_client(&db, contact.id, 1).await?;
        create_test_operator(&db, "Staff", OperatorRole::Administration).await?;
        create_test_renewal(&db, 1).await?;
        create_test_renewal(&db, 2).await?;

        let mut client_rule = test_new_rule(NotificationTask::RenewalReminder);
        client_rule.audience = Audience::Client;
        client_rule.recipients = vec![contact.id];
        let saved = upsert_rule(&db, client_rule, Utc::now()).await?;

        let transport = RecordingTransport::default();
        let scheduler = test_scheduler(&db, &transport, test_clock());
        assert_eq!(scheduler.trigger_now(&db, saved.id, utc(19, 12, 0)).await?, 1);

        let sent = transport.sent();
        assert_eq!(sent[0].to, vec!["contact@example.com".to_string()]);
        assert!(sent[0].body_text.contains("Renewals awaiting action: 1"));
        assert!(sent[0].body_text.contains(&RenewalStage::ToNotify.to_string()));
        Ok(())
    }
}
