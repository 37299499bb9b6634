use std::collections::HashSet;

use automaton_core_types::Variable;

/// Snake-cases a field label/placeholder/aria-label into a variable name
/// candidate.
pub fn snake_case(label: &str) -> String {
    let mut out = String::new();
    let mut prev_was_sep = true;
    for ch in label.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && !prev_was_sep {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_was_sep = false;
        } else if !prev_was_sep {
            out.push('_');
            prev_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('_').to_string();
    if trimmed.is_empty() {
        "value".to_string()
    } else {
        trimmed
    }
}

/// Turns a raw snake-cased candidate into a name that is both legal and
/// unique within `used`, rejecting the reserved set by renaming rather than
/// failing outright. The recorder always produces usable schemas this way;
/// the `ReservedName` error is reserved for explicit user-authored names.
pub fn allocate_name(label: &str, used: &mut HashSet<String>) -> String {
    let mut base = snake_case(label);
    if !base.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false) {
        base = format!("field_{base}");
    }
    if Variable::is_reserved(&base) {
        base = format!("{base}_field");
    }
    let mut candidate = base.clone();
    let mut suffix = 2u32;
    while used.contains(&candidate) {
        candidate = format!("{base}_{suffix}");
        suffix += 1;
    }
    used.insert(candidate.clone());
    candidate
}

/// Three-way conflict policy for import/merge.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConflictPolicy {
    Rename,
    Skip,
    Overwrite,
}

/// Resolve a proposed name against an existing set under `policy`. Returns
/// `None` when the name should be dropped (`Skip`).
pub fn resolve_conflict(
    proposed: &str,
    exists: impl Fn(&str) -> bool,
    policy: ConflictPolicy,
    unique_suffix: &str,
) -> Option<String> {
    if !exists(proposed) {
        return Some(proposed.to_string());
    }
    match policy {
        ConflictPolicy::Skip => None,
        ConflictPolicy::Overwrite => Some(proposed.to_string()),
        ConflictPolicy::Rename => Some(format!("{proposed}_imported_{unique_suffix}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_cases_mixed_case_labels() {
        assert_eq!(snake_case("User CPF"), "user_cpf");
        assert_eq!(snake_case("loginUrl"), "login_url");
    }

    #[test]
    fn allocate_name_dedupes_collisions() {
        let mut used = HashSet::new();
        let a = allocate_name("Email", &mut used);
        let b = allocate_name("Email", &mut used);
        assert_eq!(a, "email");
        assert_eq!(b, "email_2");
    }

    #[test]
    fn allocate_name_avoids_reserved_set() {
        let mut used = HashSet::new();
        let name = allocate_name("name", &mut used);
        assert_ne!(name, "name");
    }

    #[test]
    fn rename_policy_appends_suffix_on_conflict() {
        let resolved = resolve_conflict("login_url", |n| n == "login_url", ConflictPolicy::Rename, "20260730_ab12");
        assert_eq!(resolved.unwrap(), "login_url_imported_20260730_ab12");
    }

    #[test]
    fn skip_policy_drops_on_conflict() {
        let resolved = resolve_conflict("login_url", |n| n == "login_url", ConflictPolicy::Skip, "x");
        assert!(resolved.is_none());
    }
}
