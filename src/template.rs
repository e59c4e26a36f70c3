//! Template rendering: recipient data merged into the certificate markup.
//!
//! Supports the Handlebars subset the certificate template needs: escaped
//! `{{var}}`, raw `{{{var}}}` and `{{! ... }}` / `{{!-- ... --}}` comments.

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::NaiveDate;
use regex::Regex;

use crate::error::{CertificateError, TemplateError};
use crate::ledger::RecipientRecord;
use crate::resources::ResourceLoader;

/// Values available to the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    pub id: String,
    pub name: String,
    pub grade: String,
    /// `DD/MM/YYYY`.
    pub date: String,
    /// Base64 of the medal image.
    pub medal: String,
}

impl TemplateContext {
    pub fn new(record: &RecipientRecord, issued_on: NaiveDate, medal: &[u8]) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            grade: record.grade.clone(),
            date: format_issue_date(issued_on),
            medal: STANDARD.encode(medal),
        }
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "id" => Some(&self.id),
            "name" => Some(&self.name),
            "grade" => Some(&self.grade),
            "date" => Some(&self.date),
            "medal" => Some(&self.medal),
            _ => None,
        }
    }
}

pub fn format_issue_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        // Alternation order matters: comments and raw tags before plain ones.
        Regex::new(
            r"(?s)\{\{!--.*?--\}\}|\{\{!.*?\}\}|\{\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}\}|\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}",
        )
        .unwrap_or_else(|e| unreachable!("tag pattern is valid: {e}"))
    })
}

/// Substitute `ctx` into `source`.
pub fn render_template(source: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(source.len() + ctx.medal.len());
    let mut cursor = 0;

    for caps in tag_pattern().captures_iter(source) {
        let Some(whole) = caps.get(0) else { continue };
        push_literal(&mut out, &source[cursor..whole.start()], cursor)?;
        cursor = whole.end();

        if let Some(raw) = caps.get(1) {
            let value = ctx
                .lookup(raw.as_str())
                .ok_or_else(|| TemplateError::UnknownVariable(raw.as_str().to_string()))?;
            out.push_str(value);
        } else if let Some(var) = caps.get(2) {
            let value = ctx
                .lookup(var.as_str())
                .ok_or_else(|| TemplateError::UnknownVariable(var.as_str().to_string()))?;
            escape_html(&mut out, value);
        }
        // Anything else is a comment.
    }
    push_literal(&mut out, &source[cursor..], cursor)?;
    Ok(out)
}

/// Literal text must not contain a tag opener the pattern failed to match.
fn push_literal(out: &mut String, text: &str, base: usize) -> Result<(), TemplateError> {
    if let Some(pos) = text.find("{{") {
        return Err(TemplateError::Syntax { offset: base + pos });
    }
    out.push_str(text);
    Ok(())
}

fn escape_html(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            c => {
                let _ = out.write_char(c);
            }
        }
    }
}

/// Loads the bundled resources and renders a recipient's certificate.
pub struct TemplateRenderer {
    loader: Arc<dyn ResourceLoader>,
}

impl TemplateRenderer {
    pub fn new(loader: Arc<dyn ResourceLoader>) -> Self {
        Self { loader }
    }

    /// Build the context for `record`, loading the medal.
    pub async fn context_for(
        &self,
        record: &RecipientRecord,
        issued_on: NaiveDate,
    ) -> Result<TemplateContext, CertificateError> {
        let medal = self.loader.load_medal().await?;
        Ok(TemplateContext::new(record, issued_on, &medal))
    }

    pub async fn render(&self, ctx: &TemplateContext) -> Result<String, CertificateError> {
        let source = self.loader.load_template().await?;
        let markup = render_template(&source, ctx)?;
        log::debug!("rendered {} bytes of markup for {}", markup.len(), ctx.id);
        Ok(markup)
    }
}
