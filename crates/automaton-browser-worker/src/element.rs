use std::collections::HashMap;

use automaton_core_types::TargetCandidate;

/// A DOM element as observed by the driver, already filtered to the
/// attributes the spec's candidate kinds and the interpreter's heuristic
/// scorer both need.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementInfo {
    pub selector: String,
    pub tag: String,
    pub role: Option<String>,
    pub accessible_name: Option<String>,
    pub aria_label: Option<String>,
    pub placeholder: Option<String>,
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub visible: bool,
    pub area: f64,
    pub document_order: usize,
}

impl ElementInfo {
    /// Visibility check: nonzero bounding box, not `hidden`, not
    /// `opacity:0`. The driver is responsible for having already computed
    /// `visible`/`area`; this is just the guard callers should check.
    pub fn is_visible(&self) -> bool {
        self.visible && self.area > 0.0
    }

    /// Whether this element matches the given candidate description.
    pub fn matches(&self, candidate: &TargetCandidate) -> bool {
        match candidate {
            TargetCandidate::RoleName { role, name } => {
                self.role.as_deref() == Some(role.as_str())
                    && self
                        .accessible_name
                        .as_deref()
                        .map(|n| n.eq_ignore_ascii_case(name))
                        .unwrap_or(false)
            }
            TargetCandidate::AriaLabel { label } => self
                .aria_label
                .as_deref()
                .map(|l| l.eq_ignore_ascii_case(label))
                .unwrap_or(false),
            TargetCandidate::Placeholder { placeholder } => self
                .placeholder
                .as_deref()
                .map(|p| p.eq_ignore_ascii_case(placeholder))
                .unwrap_or(false),
            TargetCandidate::Text { text } => self.text.to_lowercase().contains(&text.to_lowercase()),
            TargetCandidate::Selector { selector } => &self.selector == selector,
            TargetCandidate::Index { .. } => true,
        }
    }
}

/// Tie-break order for multiple matches of the same candidate: visible area descending, then document order ascending.
pub fn tie_break(mut matches: Vec<ElementInfo>) -> Option<ElementInfo> {
    matches.sort_by(|a, b| {
        b.area
            .partial_cmp(&a.area)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.document_order.cmp(&b.document_order))
    });
    matches.into_iter().next()
}
