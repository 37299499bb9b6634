use automaton_core_types::{ActionKind, ScrollDirection, ScrollSpec, Target, TargetCandidate, WaitSpec};
use once_cell::sync::Lazy;
use regex::Regex;

/// Normalizes an instruction the way tier 1 expects: lowercased and with
/// runs of whitespace collapsed to a single space. Quoted substrings are
/// left untouched by the caller's regex groups, so normalization happens
/// before matching rather than inside each pattern.
fn normalize(instruction: &str) -> String {
    instruction
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

static NAVIGATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:go to|navigate to|open|visit)\s+(\S+)$").unwrap());
static CLICK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^click\s+(.+)$").unwrap());
static FILL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(?:type|enter|fill)\s+"(.+)"\s+(?:in|into)\s+(.+)$"#).unwrap());
static SEARCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^search for\s+(.+)$").unwrap());
static WAIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^wait\s+(\d+)\s*(?:seconds?)?$").unwrap());
static SCROLL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^scroll\s+(up|down|to\s+.+)$").unwrap());

fn target_for_phrase(phrase: &str) -> Target {
    Target::with_fallbacks(
        TargetCandidate::Text { text: phrase.trim().to_string() },
        vec![TargetCandidate::AriaLabel { label: phrase.trim().to_string() }],
    )
}

fn with_scheme(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Tier 1 of the interpreter pipeline: direct regex intents.
/// Returns `None` when nothing matches, deferring to tier 2.
pub fn match_direct(instruction: &str) -> Option<ActionKind> {
    let normalized = normalize(instruction);

    if let Some(caps) = NAVIGATE.captures(&normalized) {
        return Some(ActionKind::Navigate { url: with_scheme(&caps[1]) });
    }
    if let Some(caps) = SEARCH.captures(&normalized) {
        return Some(ActionKind::Fill {
            target: target_for_phrase("search"),
            value: caps[1].trim().to_string(),
        });
    }
    if let Some(caps) = FILL.captures(&normalized) {
        return Some(ActionKind::Fill {
            target: target_for_phrase(&caps[2]),
            value: caps[1].to_string(),
        });
    }
    if let Some(caps) = WAIT.captures(&normalized) {
        let secs: u64 = caps[1].parse().ok()?;
        return Some(ActionKind::Wait { spec: WaitSpec::Duration { millis: secs * 1000 } });
    }
    if let Some(caps) = SCROLL.captures(&normalized) {
        let direction = &caps[1];
        let spec = if let Some(target_phrase) = direction.strip_prefix("to ") {
            ScrollSpec::Target { target: target_for_phrase(target_phrase) }
        } else {
            let direction = if direction == "down" { ScrollDirection::Down } else { ScrollDirection::Up };
            ScrollSpec::Direction { direction }
        };
        return Some(ActionKind::Scroll { spec });
    }
    if let Some(caps) = CLICK.captures(&normalized) {
        return Some(ActionKind::Click { target: target_for_phrase(&caps[1]) });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigate_without_scheme_defaults_to_https() {
        let action = match_direct("Go To example.com").unwrap();
        assert!(matches!(action, ActionKind::Navigate { url } if url == "https://example.com"));
    }

    #[test]
    fn fill_extracts_quoted_value_and_target_phrase() {
        let action = match_direct(r#"type "alice@example.com" in email field"#).unwrap();
        match action {
            ActionKind::Fill { target, value } => {
                assert_eq!(value, "alice@example.com");
                assert!(matches!(target.primary, TargetCandidate::Text { .. }));
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn wait_parses_seconds_into_millis() {
        let action = match_direct("wait 3 seconds").unwrap();
        assert!(matches!(
            action,
            ActionKind::Wait { spec: WaitSpec::Duration { millis: 3000 } }
        ));
    }

    #[test]
    fn unrelated_instruction_falls_through() {
        assert!(match_direct("summarize this page for me").is_none());
    }
}
