//! `{{placeholder}}` substitution for subject and body templates.

use crate::models::{Client, Invoice};

/// Values available to templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVars {
    pub number: String,
    pub client: String,
    pub total: String,
    pub currency: String,
    pub issue_date: String,
    pub due_date: String,
}

impl TemplateVars {
    pub fn for_invoice(invoice: &Invoice, client: &Client, currency: &str) -> Self {
        Self {
            number: invoice.number.trim().to_string(),
            client: client.name.trim().to_string(),
            total: format!("{:.2}", invoice.total),
            currency: currency.trim().to_string(),
            issue_date: invoice.issue_date.clone(),
            due_date: invoice.due_date.clone(),
        }
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "number" => Some(self.number.as_str()),
            "client" => Some(self.client.as_str()),
            "total" => Some(self.total.as_str()),
            "currency" => Some(self.currency.as_str()),
            "issueDate" => Some(self.issue_date.as_str()),
            "dueDate" => Some(self.due_date.as_str()),
            _ => None,
        }
    }
}

/// Replaces known placeholders. Unknown or unterminated ones stay verbatim.
pub fn render_template(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        match vars.lookup(after[..close].trim()) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}
