//! Message composition, kept separate from delivery so it can be tested on its own.
//!
//! Every channel owns three Tera templates (`<name>.subject`, `<name>.txt`,
//! `<name>.html`). HTML templates are auto-escaped; dates are rendered by serde as
//! ISO `YYYY-MM-DD`.

use crate::entities::enums::{AlertChannel, RenewalItemType, RenewalStage};
use crate::errors::{Error, Result};
use crate::services::OutgoingMail;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tera::{Context, Tera};

const TEMPLATES: &[(&str, &str)] = &[
    (
        "invoice_due.subject",
        "Intervention #{{ line.id }} at {{ line.installation }} is ready to invoice",
    ),
    (
        "invoice_due.txt",
        "Intervention #{{ line.id }} performed on {{ line.performed_on }} at {{ line.installation }} \
was closed as TO_INVOICE and has no invoice yet.\n\n{{ line.description }}\n\
{% if line.invoice_reference %}Reference: {{ line.invoice_reference }}\n{% endif %}\
{% if line.warehouse_code %}Warehouse: {{ line.warehouse_code }}\n{% endif %}",
    ),
    (
        "invoice_due.html",
        "<p>Intervention <b>#{{ line.id }}</b> performed on {{ line.performed_on }} at \
<b>{{ line.installation }}</b> was closed as TO_INVOICE and has no invoice yet.</p>\
<p>{{ line.description }}</p>\
{% if line.invoice_reference %}<p>Reference: {{ line.invoice_reference }}</p>{% endif %}\
{% if line.warehouse_code %}<p>Warehouse: {{ line.warehouse_code }}</p>{% endif %}",
    ),
    (
        "bulk_invoice_due.subject",
        "{{ totals.items }} intervention(s) to invoice across {{ totals.installations }} installation(s)",
    ),
    (
        "bulk_invoice_due.txt",
        "Interventions to invoice: {{ totals.items }} \
(included: {{ totals.included }}, extra: {{ totals.extra }}) \
across {{ totals.installations }} installation(s)\n\
{% for group in groups %}\n== {{ group.installation }} ({{ group.lines | length }}) ==\n\
{% for line in group.lines %}- {{ line.performed_on }} #{{ line.id }} {{ line.description }} \
[{% if line.included %}included{% else %}extra{% endif %}]\n{% endfor %}{% endfor %}",
    ),
    (
        "bulk_invoice_due.html",
        "<p>Interventions to invoice: <b>{{ totals.items }}</b> \
(included: {{ totals.included }}, extra: {{ totals.extra }}) \
across {{ totals.installations }} installation(s)</p>\
{% for group in groups %}<h3>{{ group.installation }} ({{ group.lines | length }})</h3><ul>\
{% for line in group.lines %}<li>{{ line.performed_on }} #{{ line.id }} {{ line.description }} \
[{% if line.included %}included{% else %}extra{% endif %}]</li>{% endfor %}</ul>{% endfor %}",
    ),
    (
        "renewal_stage1.subject",
        "Please confirm the renewal of {{ item.reference }} due on {{ item.due_on }}",
    ),
    (
        "renewal_stage1.txt",
        "The {{ item.item_type }} {{ item.reference }}{% if item.installation %} \
for {{ item.installation }}{% endif %} is due for renewal on {{ item.due_on }}.\n\
Please confirm whether it should be renewed.\n",
    ),
    (
        "renewal_stage1.html",
        "<p>The {{ item.item_type }} <b>{{ item.reference }}</b>{% if item.installation %} \
for {{ item.installation }}{% endif %} is due for renewal on {{ item.due_on }}.</p>\
<p>Please confirm whether it should be renewed.</p>",
    ),
    (
        "renewal_stage2.subject",
        "Renewal of {{ item.reference }} confirmed, ready to invoice",
    ),
    (
        "renewal_stage2.txt",
        "The renewal of {{ item.item_type }} {{ item.reference }}{% if item.installation %} \
for {{ item.installation }}{% endif %} (due {{ item.due_on }}) was confirmed \
and is ready to invoice.\n",
    ),
    (
        "renewal_stage2.html",
        "<p>The renewal of {{ item.item_type }} <b>{{ item.reference }}</b>\
{% if item.installation %} for {{ item.installation }}{% endif %} (due {{ item.due_on }}) \
was confirmed and is ready to invoice.</p>",
    ),
    (
        "renewal_reminder.subject",
        "{{ items | length }} renewal(s) awaiting action",
    ),
    (
        "renewal_reminder.txt",
        "Renewals awaiting action: {{ items | length }}\n\
{% for item in items %}- {{ item.due_on }} {{ item.item_type }} {{ item.reference }} \
[{{ item.stage }}]{% if item.installation %} {{ item.installation }}{% endif %}\n{% endfor %}",
    ),
    (
        "renewal_reminder.html",
        "<p>Renewals awaiting action: <b>{{ items | length }}</b></p><ul>\
{% for item in items %}<li>{{ item.due_on }} {{ item.item_type }} {{ item.reference }} \
[{{ item.stage }}]{% if item.installation %} {{ item.installation }}{% endif %}</li>{% endfor %}</ul>",
    ),
    (
        "intervention_reopened.subject",
        "Intervention #{{ intervention_id }} reopened",
    ),
    (
        "intervention_reopened.txt",
        "Intervention #{{ intervention_id }} was reopened by {{ actor }} at {{ at }}.\n",
    ),
    (
        "intervention_reopened.html",
        "<p>Intervention #{{ intervention_id }} was reopened by {{ actor }} at {{ at }}.</p>",
    ),
];

/// Rendered subject and bodies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body_text: String,
    /// HTML body
    pub body_html: String,
}

impl RenderedMessage {
    /// Builds a message from caller-supplied text; the HTML body is the escaped text.
    #[must_use]
    pub fn from_text(subject: String, body: String) -> Self {
        let body_html = format!("<pre>{}</pre>", tera::escape_html(&body));
        Self {
            subject,
            body_text: body,
            body_html,
        }
    }

    /// Addresses the message to `to`.
    #[must_use]
    pub fn to_mail(&self, to: Vec<String>) -> OutgoingMail {
        OutgoingMail {
            to,
            subject: self.subject.clone(),
            body_text: self.body_text.clone(),
            body_html: self.body_html.clone(),
        }
    }
}

/// One intervention as it appears in an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterventionLine {
    /// Intervention id
    pub id: i64,
    /// Client owning the installation
    pub client_id: i64,
    /// Installation record the visit belongs to
    pub installation_id: i64,
    /// Installation display name
    pub installation: String,
    /// Day of the visit
    pub performed_on: NaiveDate,
    /// Work performed
    pub description: String,
    /// Counted against the quota
    pub included: bool,
    /// Invoice routing reference
    pub invoice_reference: Option<String>,
    /// Invoice routing warehouse code
    pub warehouse_code: Option<String>,
}

/// One renewal item as it appears in an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenewalLine {
    /// Renewal item id
    pub id: i64,
    /// Client the item belongs to
    pub client_id: i64,
    /// License or service
    pub item_type: RenewalItemType,
    /// Human reference
    pub reference: String,
    /// Installation name, if site-specific
    pub installation: Option<String>,
    /// Due date
    pub due_on: NaiveDate,
    /// Current stage
    pub stage: RenewalStage,
}

/// Interventions of a single installation, in date order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallationGroup {
    /// Installation record id
    pub installation_id: i64,
    /// Installation display name
    pub installation: String,
    /// Lines in date order
    pub lines: Vec<InterventionLine>,
}

/// Counts shown in the header of a bulk message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkTotals {
    /// Listed interventions
    pub items: usize,
    /// Distinct installations
    pub installations: usize,
    /// Lines counted against a quota
    pub included: usize,
    /// Lines billed as extra
    pub extra: usize,
}

/// Groups lines by installation record, sorted by installation name then date.
/// Installations sharing a name stay separate groups.
#[must_use]
pub fn group_by_installation(mut lines: Vec<InterventionLine>) -> Vec<InstallationGroup> {
    lines.sort_by(|a, b| {
        a.installation
            .cmp(&b.installation)
            .then(a.installation_id.cmp(&b.installation_id))
            .then(a.performed_on.cmp(&b.performed_on))
            .then(a.id.cmp(&b.id))
    });

    let mut groups: Vec<InstallationGroup> = Vec::new();
    for line in lines {
        match groups.last_mut() {
            Some(group) if group.installation_id == line.installation_id => group.lines.push(line),
            _ => groups.push(InstallationGroup {
                installation_id: line.installation_id,
                installation: line.installation.clone(),
                lines: vec![line],
            }),
        }
    }
    groups
}

/// Header counts of grouped lines.
#[must_use]
pub fn bulk_totals(groups: &[InstallationGroup]) -> BulkTotals {
    let items: usize = groups.iter().map(|g| g.lines.len()).sum();
    let included = groups
        .iter()
        .flat_map(|g| &g.lines)
        .filter(|l| l.included)
        .count();
    BulkTotals {
        items,
        installations: groups.len(),
        included,
        extra: items - included,
    }
}

/// Renders channel templates.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    tera: Tera,
}

impl MessageFormatter {
    /// Compiles every channel template.
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.iter().copied())?;
        Ok(Self { tera })
    }

    fn render(&self, name: &str, context: &Context) -> Result<RenderedMessage> {
        Ok(RenderedMessage {
            subject: self
                .tera
                .render(&format!("{name}.subject"), context)?
                .trim()
                .to_string(),
            body_text: self.tera.render(&format!("{name}.txt"), context)?,
            body_html: self.tera.render(&format!("{name}.html"), context)?,
        })
    }

    /// Single invoice-due alert.
    pub fn invoice_due(&self, line: &InterventionLine) -> Result<RenderedMessage> {
        let mut context = Context::new();
        context.insert("line", line);
        self.render("invoice_due", &context)
    }

    /// One message listing every line, grouped per installation with a totals header.
    pub fn bulk_invoice_due(&self, lines: Vec<InterventionLine>) -> Result<RenderedMessage> {
        let groups = group_by_installation(lines);
        let mut context = Context::new();
        context.insert("totals", &bulk_totals(&groups));
        context.insert("groups", &groups);
        self.render("bulk_invoice_due", &context)
    }

    /// Stage-1 or stage-2 renewal message for a single item.
    ///
    /// # Errors
    /// Returns a validation error for any channel other than the two renewal stages.
    pub fn renewal_stage(&self, channel: AlertChannel, item: &RenewalLine) -> Result<RenderedMessage> {
        let name = match channel {
            AlertChannel::RenewalStage1 => "renewal_stage1",
            AlertChannel::RenewalStage2 => "renewal_stage2",
            other => {
                return Err(Error::validation(format!(
                    "{other} is not a renewal stage channel"
                )));
            }
        };
        let mut context = Context::new();
        context.insert("item", item);
        self.render(name, &context)
    }

    /// Digest of open renewals.
    pub fn renewal_reminder(&self, items: &[RenewalLine]) -> Result<RenderedMessage> {
        let mut context = Context::new();
        context.insert("items", items);
        self.render("renewal_reminder", &context)
    }

    /// Audit message of a reopen.
    pub fn intervention_reopened(
        &self,
        intervention_id: i64,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<RenderedMessage> {
        let mut context = Context::new();
        context.insert("intervention_id", &intervention_id);
        context.insert("actor", actor);
        context.insert("at", &at.format("%Y-%m-%d %H:%M UTC").to_string());
        self.render("intervention_reopened", &context)
    }
}
