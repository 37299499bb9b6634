use once_cell::sync::Lazy;
use regex::Regex;

use automaton_core_types::VariableKind;

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9][0-9\-\s]{6,14}[0-9]$").unwrap());
static DATE_ISO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static DATE_SLASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}/\d{2}/\d{4}$").unwrap());
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());

/// Context the detector needs beyond the literal value itself, since a few
/// kinds (password, secret) aren't derivable from the string alone.
pub struct LiteralContext<'a> {
    pub value: &'a str,
    pub field_type_attr: Option<&'a str>,
    pub instruction: Option<&'a str>,
}

/// Secret-marking prefix recognized on an instruction.
pub fn secret_marker(instruction: &str) -> Option<&str> {
    instruction.strip_prefix("secret:")
}

/// Classify one literal value against the ordered detector table. Order
/// matters: password/secret are checked before the generic `text` catch-all,
/// and before the looser `number`/`date` patterns that could otherwise
/// misfire on a numeric-looking secret.
pub fn classify(ctx: &LiteralContext) -> VariableKind {
    if ctx.field_type_attr == Some("password") {
        return VariableKind::Password;
    }
    if let Some(instruction) = ctx.instruction {
        if secret_marker(instruction).is_some() {
            return VariableKind::Secret;
        }
    }
    if EMAIL.is_match(ctx.value) {
        return VariableKind::Email;
    }
    if PHONE.is_match(ctx.value) {
        return VariableKind::Phone;
    }
    if DATE_ISO.is_match(ctx.value) || DATE_SLASH.is_match(ctx.value) {
        return VariableKind::Date;
    }
    if ctx.value.starts_with("http://") || ctx.value.starts_with("https://") {
        return VariableKind::Url;
    }
    if NUMBER.is_match(ctx.value) {
        return VariableKind::Number;
    }
    VariableKind::Text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(value: &str) -> LiteralContext<'_> {
        LiteralContext { value, field_type_attr: None, instruction: None }
    }

    #[test]
    fn classifies_email() {
        assert_eq!(classify(&ctx("alice@example.com")), VariableKind::Email);
    }

    #[test]
    fn classifies_iso_date() {
        assert_eq!(classify(&ctx("2026-07-30")), VariableKind::Date);
    }

    #[test]
    fn classifies_url() {
        assert_eq!(classify(&ctx("https://example.com/path")), VariableKind::Url);
    }

    #[test]
    fn classifies_number() {
        assert_eq!(classify(&ctx("42.5")), VariableKind::Number);
    }

    #[test]
    fn password_field_wins_over_pattern_checks() {
        let ctx = LiteralContext { value: "hunter2", field_type_attr: Some("password"), instruction: None };
        assert_eq!(classify(&ctx), VariableKind::Password);
    }

    #[test]
    fn plain_text_is_the_fallback() {
        assert_eq!(classify(&ctx("just some words")), VariableKind::Text);
    }
}
