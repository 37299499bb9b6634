//! Substitutes `${NAME}` / `{{NAME}}` / `{NAME}` tokens in action fields
//! against a resolved `{name -> value}` map.

use std::collections::HashMap;

use automaton_core_types::{ActionKind, OrchestratorError, ScrollSpec};
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_-]*)\}|\{\{([A-Za-z_][A-Za-z0-9_-]*)\}\}|\{([A-Za-z_][A-Za-z0-9_-]*)\}").unwrap());

fn token_name(caps: &regex::Captures) -> &str {
    caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)).map(|m| m.as_str()).unwrap_or("")
}

/// Substitute every recognized token in `text`. `url_encode` controls
/// whether resolved values are percent-encoded, which applies only to URL
/// fields. Missing names are collected rather than failing
/// fast, so the caller can report every missing variable in one `MissingVariable`.
pub fn substitute(
    text: &str,
    values: &HashMap<String, String>,
    url_encode: bool,
    missing: &mut Vec<String>,
) -> String {
    TOKEN
        .replace_all(text, |caps: &regex::Captures| {
            let name = token_name(caps);
            match values.get(name) {
                Some(value) if url_encode => {
                    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
                }
                Some(value) => value.clone(),
                None => {
                    if !missing.contains(&name.to_string()) {
                        missing.push(name.to_string());
                    }
                    caps.get(0).unwrap().as_str().to_string()
                }
            }
        })
        .into_owned()
}

/// Resolve every variable reference inside one [`ActionKind`], returning a
/// new action with substituted literals or `MissingVariable` listing every
/// unresolved name.
pub fn resolve_action(action: &ActionKind, values: &HashMap<String, String>) -> Result<ActionKind, OrchestratorError> {
    let mut missing = Vec::new();
    let resolved = match action {
        ActionKind::Navigate { url } => {
            ActionKind::Navigate { url: substitute(url, values, true, &mut missing) }
        }
        ActionKind::Fill { target, value } => ActionKind::Fill {
            target: target.clone(),
            value: substitute(value, values, false, &mut missing),
        },
        ActionKind::Click { target } => ActionKind::Click { target: target.clone() },
        ActionKind::Select { target, option } => ActionKind::Select {
            target: target.clone(),
            option: substitute(option, values, false, &mut missing),
        },
        ActionKind::Extract { target, variable } => {
            ActionKind::Extract { target: target.clone(), variable: variable.clone() }
        }
        ActionKind::Wait { spec } => ActionKind::Wait { spec: spec.clone() },
        ActionKind::Scroll { spec } => ActionKind::Scroll { spec: resolve_scroll(spec, values, &mut missing) },
        ActionKind::Assert { predicate } => {
            ActionKind::Assert { predicate: substitute(predicate, values, false, &mut missing) }
        }
    };

    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(OrchestratorError::MissingVariable { missing })
    }
}

fn resolve_scroll(spec: &ScrollSpec, values: &HashMap<String, String>, missing: &mut Vec<String>) -> ScrollSpec {
    match spec {
        ScrollSpec::Direction { direction } => ScrollSpec::Direction { direction: *direction },
        ScrollSpec::Target { target } => {
            let _ = missing;
            ScrollSpec::Target { target: target.clone() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("user".to_string(), "a b@c".to_string());
        m
    }

    #[test]
    fn all_three_token_styles_resolve() {
        let mut missing = Vec::new();
        assert_eq!(substitute("${user}", &values(), false, &mut missing), "a b@c");
        assert_eq!(substitute("{{user}}", &values(), false, &mut missing), "a b@c");
        assert_eq!(substitute("{user}", &values(), false, &mut missing), "a b@c");
        assert!(missing.is_empty());
    }

    #[test]
    fn url_fields_are_percent_encoded() {
        let mut missing = Vec::new();
        let out = substitute("https://x.test/?q=${user}", &values(), true, &mut missing);
        assert!(out.contains("a%20b%40c"));
    }

    #[test]
    fn missing_name_is_reported_without_panicking() {
        let mut missing = Vec::new();
        let out = substitute("${nope}", &values(), false, &mut missing);
        assert_eq!(out, "${nope}");
        assert_eq!(missing, vec!["nope".to_string()]);
    }

    #[test]
    fn resolve_action_surfaces_missing_variable_error() {
        let action = ActionKind::Navigate { url: "https://x.test/${missing}".into() };
        let err = resolve_action(&action, &HashMap::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::MissingVariable { missing } if missing == vec!["missing".to_string()]));
    }
}
