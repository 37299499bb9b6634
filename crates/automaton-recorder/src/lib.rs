//! Observes executed Actions and accumulates them into a [`Script`], then
//! infers its variable schema by classifying each literal value recorded
//! along the way.

pub mod detect;
pub mod naming;

use std::collections::{HashMap, HashSet};

use automaton_core_types::{
    Action, ActionKind, OrchestratorError, Script, ScriptId, ScriptOrigin, Target, TargetCandidate,
    Variable, VariableKind, VariableSchema,
};
use chrono::Utc;
use tracing::debug;

fn label_for_target(target: &Target) -> String {
    match &target.primary {
        TargetCandidate::RoleName { name, .. } => name.clone(),
        TargetCandidate::AriaLabel { label } => label.clone(),
        TargetCandidate::Placeholder { placeholder } => placeholder.clone(),
        TargetCandidate::Text { text } => text.clone(),
        TargetCandidate::Selector { selector } => selector.clone(),
        TargetCandidate::Index { index } => format!("field_{index}"),
    }
}

fn field_type_hint(target: &Target) -> Option<String> {
    match &target.primary {
        TargetCandidate::Placeholder { placeholder } if placeholder.to_lowercase().contains("password") => {
            Some("password".to_string())
        }
        _ => None,
    }
}

/// Accumulates successful Actions for one in-progress recording session.
pub struct Recorder {
    actions: Vec<Action>,
    saw_navigate: bool,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self { actions: Vec::new(), saw_navigate: false }
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Append a successfully executed action.
    /// `current_url` synthesizes the mandatory first `navigate` step the
    /// first time it's called, if the caller hasn't already recorded one.
    pub fn record_success(
        &mut self,
        instruction: Option<String>,
        kind: ActionKind,
        current_url: &str,
    ) {
        if !self.saw_navigate {
            self.saw_navigate = true;
            if !matches!(kind, ActionKind::Navigate { .. }) {
                let step = (self.actions.len() + 1) as u32;
                let mut synthetic = Action::new(step, "Navigate to starting page", ActionKind::Navigate {
                    url: current_url.to_string(),
                });
                synthetic.instruction = None;
                self.actions.push(synthetic);
                debug!(url = current_url, "recorded synthetic first navigate step");
            }
        }
        let step = (self.actions.len() + 1) as u32;
        let description = describe(&kind);
        let mut action = Action::new(step, description, kind);
        action.instruction = instruction;
        self.actions.push(action);
    }

    /// Finalize the recording into a persistable [`Script`], inferring and
    /// substituting variables for literal values.
    pub fn finish(mut self, name: impl Into<String>) -> Result<Script, OrchestratorError> {
        if self.actions.is_empty() {
            return Err(OrchestratorError::SchemaMismatch { reason: "nothing was recorded".into() });
        }

        let initial_url = match &self.actions[0].kind {
            ActionKind::Navigate { url } => url.clone(),
            _ => String::new(),
        };

        let mut schema = VariableSchema::default();
        let mut literal_to_name: HashMap<String, String> = HashMap::new();
        let mut used_names: HashSet<String> = HashSet::new();

        for (idx, action) in self.actions.iter_mut().enumerate() {
            if idx == 0 {
                // The synthetic/explicit first navigate seeds `initial_url`
                // directly; it is never itself a variable.
                continue;
            }
            let (literal, label, field_type) = match &action.kind {
                ActionKind::Fill { target, value } => {
                    (value.clone(), label_for_target(target), field_type_hint(target))
                }
                ActionKind::Select { target, option } => {
                    (option.clone(), label_for_target(target), None)
                }
                ActionKind::Navigate { url } => (url.clone(), "url".to_string(), None),
                _ => continue,
            };
            if literal.is_empty() {
                continue;
            }

            let kind = detect::classify(&detect::LiteralContext {
                value: &literal,
                field_type_attr: field_type.as_deref(),
                instruction: action.instruction.as_deref(),
            });

            let var_name = match literal_to_name.get(&literal) {
                Some(existing) => existing.clone(),
                None => {
                    let allocated = naming::allocate_name(&label, &mut used_names);
                    literal_to_name.insert(literal.clone(), allocated.clone());
                    allocated
                }
            };

            if schema.get(&var_name).is_none() {
                let sensitive = matches!(kind, VariableKind::Password | VariableKind::Secret);
                schema.variables.push(Variable {
                    name: var_name.clone(),
                    kind,
                    pattern: None,
                    required: true,
                    sensitive,
                    default: None,
                    value: if sensitive { None } else { Some(literal.clone()) },
                });
            }

            match &mut action.kind {
                ActionKind::Fill { value, .. } => *value = format!("${{{var_name}}}"),
                ActionKind::Select { option, .. } => *option = format!("${{{var_name}}}"),
                ActionKind::Navigate { url } => *url = format!("${{{var_name}}}"),
                _ => {}
            }
            action.variable = Some(var_name);
        }

        schema.redact_sensitive();

        let script = Script {
            id: ScriptId::new(),
            name: name.into(),
            created_at: Utc::now(),
            last_run_at: None,
            origin: ScriptOrigin::Recorded,
            initial_url,
            actions: self.actions,
            schema,
            checksum: None,
        };
        script.validate()?;
        Ok(script)
    }
}

fn describe(kind: &ActionKind) -> String {
    match kind {
        ActionKind::Navigate { url } => format!("Navigate to {url}"),
        ActionKind::Fill { .. } => "Fill field".to_string(),
        ActionKind::Click { .. } => "Click element".to_string(),
        ActionKind::Select { .. } => "Select option".to_string(),
        ActionKind::Wait { .. } => "Wait".to_string(),
        ActionKind::Scroll { .. } => "Scroll page".to_string(),
        ActionKind::Extract { variable, .. } => format!("Extract into {variable}"),
        ActionKind::Assert { .. } => "Assert condition".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automaton_core_types::TargetCandidate;

    #[test]
    fn first_non_navigate_action_gets_a_synthetic_navigate_prepended() {
        let mut recorder = Recorder::new();
        recorder.record_success(
            None,
            ActionKind::Click { target: Target::new(TargetCandidate::Selector { selector: "#go".into() }) },
            "https://example.test/start",
        );
        let script = recorder.finish("test script").unwrap();
        assert_eq!(script.initial_url, "https://example.test/start");
        assert_eq!(script.actions.len(), 2);
        assert!(matches!(script.actions[0].kind, ActionKind::Navigate { .. }));
    }

    #[test]
    fn repeated_literal_values_share_one_variable() {
        let mut recorder = Recorder::new();
        recorder.record_success(
            None,
            ActionKind::Navigate { url: "https://example.test".into() },
            "https://example.test",
        );
        let target = Target::new(TargetCandidate::Placeholder { placeholder: "Email".into() });
        recorder.record_success(
            Some("fill email".into()),
            ActionKind::Fill { target: target.clone(), value: "alice@example.com".into() },
            "https://example.test",
        );
        recorder.record_success(
            Some("fill confirm email".into()),
            ActionKind::Fill { target, value: "alice@example.com".into() },
            "https://example.test",
        );
        let script = recorder.finish("dup test").unwrap();
        assert_eq!(script.schema.variables.len(), 1);
        assert_eq!(script.schema.variables[0].kind, VariableKind::Email);
    }

    #[test]
    fn password_value_is_marked_sensitive_and_erased() {
        let mut recorder = Recorder::new();
        recorder.record_success(
            None,
            ActionKind::Navigate { url: "https://example.test".into() },
            "https://example.test",
        );
        let target = Target::new(TargetCandidate::Placeholder { placeholder: "Password".into() });
        recorder.record_success(
            None,
            ActionKind::Fill { target, value: "hunter2".into() },
            "https://example.test",
        );
        let script = recorder.finish("pw test").unwrap();
        let var = &script.schema.variables[0];
        assert!(var.sensitive);
        assert!(var.value.is_none());
    }
}
