//! Campaign message rendering.
//!
//! [`TemplateRenderer::render`] is a pure function of its inputs: no clock,
//! no I/O, no shared state. Each [`CampaignKind`] has its own layout; all of
//! them share the envelope footer carrying the service attribution and the
//! recipient's unsubscribe link.

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::types::{AssignedVariant, CampaignKind, ExperimentAxis};
use serde_json::{Map, Value};

/// Final subject and HTML body for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CallToAction {
    label: String,
    url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Info,
    Warning,
    Critical,
}

pub struct TemplateRenderer {
    service_name: String,
    unsubscribe_base_url: String,
}

impl TemplateRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            unsubscribe_base_url: config.unsubscribe_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Render one message. The variant, if any, is substituted into the slot
    /// its axis names before any formatting happens.
    pub fn render(
        &self,
        kind: CampaignKind,
        subject: &str,
        content: &Value,
        variant: Option<&AssignedVariant>,
        unsubscribe_token: &str,
    ) -> Result<RenderedMessage, RenderError> {
        if unsubscribe_token.trim().is_empty() {
            return Err(RenderError::MissingUnsubscribeToken);
        }
        let obj = content.as_object().ok_or(RenderError::NotAnObject)?;

        let mut subject = subject.to_string();
        let mut headline_override = None;
        let mut cta = optional_cta(obj)?;

        if let Some(variant) = variant {
            match variant.axis {
                ExperimentAxis::Subject => subject = variant.value.clone(),
                ExperimentAxis::Headline => headline_override = Some(variant.value.clone()),
                ExperimentAxis::Cta => cta = Some(cta_from_variant(&variant.value, cta)?),
            }
        }

        if subject.trim().is_empty() {
            return Err(RenderError::MissingField("subject".to_string()));
        }
        let headline = match headline_override {
            Some(h) => h,
            None => required_str(obj, "headline")?.to_string(),
        };

        let (subject, sections) = match kind {
            CampaignKind::Brief => (subject, render_brief(obj, &headline)?),
            CampaignKind::Alert => render_alert(obj, subject, &headline)?,
            CampaignKind::Broadcast => (subject, render_broadcast(obj, &headline)?),
        };

        let mut html = String::with_capacity(1024);
        html.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">");
        html.push_str(&format!("<title>{}</title></head><body>\n", escape(&subject)));
        html.push_str(&format!("<div class=\"campaign campaign-{}\">\n", kind.as_str()));
        html.push_str(&sections);
        if let Some(cta) = &cta {
            html.push_str(&format!(
                "<p class=\"cta\"><a href=\"{}\">{}</a></p>\n",
                escape(&cta.url),
                escape(&cta.label)
            ));
        }
        html.push_str("</div>\n");
        html.push_str(&self.footer(unsubscribe_token));
        html.push_str("</body></html>");

        Ok(RenderedMessage { subject, html })
    }

    fn footer(&self, token: &str) -> String {
        format!(
            "<footer class=\"envelope\"><p>Sent by {}</p><p><a href=\"{}/{}\">Unsubscribe</a></p></footer>\n",
            escape(&self.service_name),
            escape(&self.unsubscribe_base_url),
            escape(token.trim())
        )
    }
}

// ─── Per-kind layouts ───────────────────────────────────────────────────

fn render_brief(obj: &Map<String, Value>, headline: &str) -> Result<String, RenderError> {
    let mut out = format!("<h1>{}</h1>\n", escape(headline));
    if let Some(intro) = optional_str(obj, "intro")? {
        out.push_str(&format!("<p class=\"intro\">{}</p>\n", escape(intro)));
    }

    let items = obj
        .get("items")
        .ok_or_else(|| RenderError::MissingField("items".to_string()))?
        .as_array()
        .ok_or_else(|| invalid("items", "expected a list"))?;
    if items.is_empty() {
        return Err(invalid("items", "a brief needs at least one item"));
    }

    out.push_str("<ul class=\"items\">\n");
    for (i, item) in items.iter().enumerate() {
        let item = item
            .as_object()
            .ok_or_else(|| invalid(&format!("items[{i}]"), "expected an object"))?;
        let title = required_str(item, "title").map_err(|e| nest(e, &format!("items[{i}]")))?;
        let summary =
            required_str(item, "summary").map_err(|e| nest(e, &format!("items[{i}]")))?;
        let url = optional_str(item, "url").map_err(|e| nest(e, &format!("items[{i}]")))?;

        let title_html = match url {
            Some(url) => format!("<a href=\"{}\">{}</a>", escape(url), escape(title)),
            None => escape(title),
        };
        out.push_str(&format!(
            "<li><h2>{}</h2><p>{}</p></li>\n",
            title_html,
            escape(summary)
        ));
    }
    out.push_str("</ul>\n");
    Ok(out)
}

fn render_alert(
    obj: &Map<String, Value>,
    subject: String,
    headline: &str,
) -> Result<(String, String), RenderError> {
    let body = required_str(obj, "body")?;
    let severity = match optional_str(obj, "severity")? {
        None | Some("info") => Severity::Info,
        Some("warning") => Severity::Warning,
        Some("critical") => Severity::Critical,
        Some(other) => {
            return Err(invalid(
                "severity",
                &format!("unknown severity `{other}`"),
            ))
        }
    };

    let (prefix, class) = match severity {
        Severity::Info => ("[Alert] ", "info"),
        Severity::Warning => ("[Alert] ", "warning"),
        Severity::Critical => ("[Critical] ", "critical"),
    };

    let sections = format!(
        "<div class=\"alert alert-{}\"><h1>{}</h1><p>{}</p></div>\n",
        class,
        escape(headline),
        escape(body)
    );
    Ok((format!("{prefix}{subject}"), sections))
}

fn render_broadcast(obj: &Map<String, Value>, headline: &str) -> Result<String, RenderError> {
    let body = required_str(obj, "body")?;
    let paragraphs: String = body
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| format!("<p>{}</p>\n", escape(p.trim())))
        .collect();
    Ok(format!("<h1>{}</h1>\n{}", escape(headline), paragraphs))
}

// ─── Field helpers ──────────────────────────────────────────────────────

fn required_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a str, RenderError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(RenderError::MissingField(field.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(RenderError::MissingField(field.to_string()))
        }
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(invalid(field, "expected a string")),
    }
}

fn optional_str<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
) -> Result<Option<&'a str>, RenderError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(invalid(field, "expected a string")),
    }
}

fn optional_cta(obj: &Map<String, Value>) -> Result<Option<CallToAction>, RenderError> {
    match obj.get("cta") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(cta)) => {
            let label = required_str(cta, "label").map_err(|e| nest(e, "cta"))?;
            let url = required_str(cta, "url").map_err(|e| nest(e, "cta"))?;
            Ok(Some(CallToAction {
                label: label.to_string(),
                url: url.to_string(),
            }))
        }
        Some(_) => Err(invalid("cta", "expected an object")),
    }
}

/// A CTA variant is either a bare label, which keeps the payload's link,
/// or `label|url`, which replaces both.
fn cta_from_variant(
    value: &str,
    original: Option<CallToAction>,
) -> Result<CallToAction, RenderError> {
    let (label, url) = match value.split_once('|') {
        Some((label, url)) => (label.trim(), Some(url.trim())),
        None => (value.trim(), None),
    };
    if label.is_empty() {
        return Err(RenderError::MissingField("cta.label".to_string()));
    }
    let url = match url.filter(|u| !u.is_empty()) {
        Some(url) => url.to_string(),
        None => original
            .map(|cta| cta.url)
            .ok_or_else(|| RenderError::MissingField("cta.url".to_string()))?,
    };
    Ok(CallToAction {
        label: label.to_string(),
        url,
    })
}

fn invalid(field: &str, reason: &str) -> RenderError {
    RenderError::InvalidField {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn nest(err: RenderError, parent: &str) -> RenderError {
    match err {
        RenderError::MissingField(f) => RenderError::MissingField(format!("{parent}.{f}")),
        RenderError::InvalidField { field, reason } => RenderError::InvalidField {
            field: format!("{parent}.{field}"),
            reason,
        },
        other => other,
    }
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
