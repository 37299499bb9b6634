use automaton_browser_worker::ElementInfo;
use automaton_core_types::{ActionKind, Target, TargetCandidate};

const ACCEPT_THRESHOLD: f64 = 0.2;
const MARGIN_THRESHOLD: f64 = 0.1;

/// One scored element from tier 2, surfaced to the caller as diagnostic
/// context on `Ambiguous`.
#[derive(Clone, Debug)]
pub struct ScoredElement {
    pub element: ElementInfo,
    pub score: f64,
}

fn tokenize(instruction: &str) -> Vec<String> {
    instruction
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.to_string())
        .collect()
}

fn field_haystacks(element: &ElementInfo) -> Vec<String> {
    let mut fields = vec![element.text.clone()];
    fields.extend(element.placeholder.clone());
    fields.extend(element.accessible_name.clone());
    fields.extend(element.aria_label.clone());
    fields.extend(element.attrs.get("id").cloned());
    fields.extend(element.attrs.get("class").cloned());
    fields.extend(element.attrs.get("title").cloned());
    fields.extend(element.attrs.get("value").cloned());
    fields.into_iter().map(|f| f.to_lowercase()).collect()
}

const TYPE_KEYWORDS: &[(&str, &[&str])] = &[
    ("search", &["input", "search"]),
    ("field", &["input", "textarea"]),
    ("button", &["button"]),
    ("link", &["a"]),
];

fn category_bonus(tokens: &[String], element: &ElementInfo) -> f64 {
    for (keyword, tags) in TYPE_KEYWORDS {
        if tokens.iter().any(|t| t == keyword) && tags.contains(&element.tag.as_str()) {
            return 0.3;
        }
    }
    0.0
}

fn score(instruction_tokens: &[String], element: &ElementInfo) -> f64 {
    if instruction_tokens.is_empty() {
        return 0.0;
    }
    let haystacks = field_haystacks(element);
    let mut total = 0.0;
    for token in instruction_tokens {
        let exact = haystacks
            .iter()
            .any(|h| h.split(|c: char| !c.is_alphanumeric()).any(|w| w == token));
        if exact {
            total += 1.0;
        } else if haystacks.iter().any(|h| h.contains(token.as_str())) {
            total += 0.5;
        }
    }
    total += category_bonus(instruction_tokens, element);
    total / instruction_tokens.len() as f64
}

pub enum HeuristicOutcome {
    Action(ActionKind),
    Ambiguous(Vec<ScoredElement>),
    NoMatch,
}

/// Tier 2 of the interpreter pipeline. `build_action` turns
/// the winning element's selector into a concrete `ActionKind`; callers can
/// recover the `Target` it used via `ActionKind::target()`.
/// Score every visible element against the instruction, best match first.
/// Used directly by tier 2 and reused by the tier 3 fallback path, which
/// wants the top candidate even when it falls below [`ACCEPT_THRESHOLD`] —
/// a single best-effort action beats rejecting the instruction outright.
pub fn score_all(instruction: &str, elements: &[ElementInfo]) -> Vec<ScoredElement> {
    let tokens = tokenize(instruction);
    let mut scored: Vec<ScoredElement> = elements
        .iter()
        .filter(|e| e.is_visible())
        .map(|e| ScoredElement { element: e.clone(), score: score(&tokens, e) })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

pub fn resolve_heuristic(
    instruction: &str,
    elements: &[ElementInfo],
    build_action: impl Fn(Target) -> ActionKind,
) -> HeuristicOutcome {
    let scored = score_all(instruction, elements);

    let Some(top) = scored.first() else {
        return HeuristicOutcome::NoMatch;
    };
    if top.score < ACCEPT_THRESHOLD {
        return HeuristicOutcome::NoMatch;
    }
    let runner_up = scored.get(1).map(|s| s.score).unwrap_or(0.0);
    if top.score - runner_up < MARGIN_THRESHOLD {
        return HeuristicOutcome::Ambiguous(scored.into_iter().take(5).collect());
    }

    let target = Target::new(TargetCandidate::Selector { selector: top.element.selector.clone() });
    HeuristicOutcome::Action(build_action(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn element(selector: &str, tag: &str, text: &str, id: &str) -> ElementInfo {
        let mut attrs = HashMap::new();
        attrs.insert("id".to_string(), id.to_string());
        ElementInfo {
            selector: selector.to_string(),
            tag: tag.to_string(),
            role: None,
            accessible_name: None,
            aria_label: None,
            placeholder: None,
            text: text.to_string(),
            attrs,
            visible: true,
            area: 100.0,
            document_order: 0,
        }
    }

    #[test]
    fn exact_word_hit_clears_threshold() {
        let elements = vec![element("#submit", "button", "Submit Order", "submit-btn")];
        let outcome = resolve_heuristic("click submit button", &elements, |target| {
            ActionKind::Click { target }
        });
        assert!(matches!(outcome, HeuristicOutcome::Action(..)));
    }

    #[test]
    fn close_scores_report_ambiguous() {
        let elements = vec![
            element("#a", "button", "Save", "save-a"),
            element("#b", "button", "Save", "save-b"),
        ];
        let outcome = resolve_heuristic("click save button", &elements, |target| {
            ActionKind::Click { target }
        });
        assert!(matches!(outcome, HeuristicOutcome::Ambiguous(_)));
    }

    #[test]
    fn low_score_yields_no_match() {
        let elements = vec![element("#x", "div", "unrelated", "x")];
        let outcome = resolve_heuristic("click submit button", &elements, |target| {
            ActionKind::Click { target }
        });
        assert!(matches!(outcome, HeuristicOutcome::NoMatch));
    }
}
