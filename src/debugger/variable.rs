//! Rendering of analyzer domain values as DAP variables.
//!
//! The abstract state of a node is an opaque JSON tree. Two views are offered:
//! "All" flattens the base value domain (plus the held mutexes) into one list,
//! "Raw" exposes the whole state unmodified. Nested objects expand lazily
//! through variables references.

use itertools::Itertools;
use serde_json::Value;

use crate::dap::protocol::{Scope, Variable};
use crate::debugger::Debugger;

impl Debugger {
    /// Build the "All" and "Raw" scopes for one node state.
    pub(super) fn build_node_scopes(&mut self, state: &Value) -> Vec<Scope> {
        let mut all_entries: Vec<(String, Value)> = vec![(
            "<locked>".to_string(),
            state.get("mutex").cloned().unwrap_or(Value::Null),
        )];
        let base_values = state
            .get("base")
            .and_then(|base| base.get("value domain"))
            .and_then(Value::as_object);
        if let Some(values) = base_values {
            // Temporaries introduced by the analyzer frontend are noise.
            all_entries.extend(
                values
                    .iter()
                    .filter(|(name, _)| !name.starts_with("tmp"))
                    .map(|(name, value)| (name.clone(), value.clone())),
            );
        }
        let all_reference = self.store_domain_values(all_entries);

        let raw_reference =
            self.store_domain_values(vec![("(arg/state)".to_string(), state.clone())]);

        vec![
            Scope {
                name: "All".to_string(),
                variables_reference: all_reference,
                expensive: false,
            },
            Scope {
                name: "Raw".to_string(),
                variables_reference: raw_reference,
                expensive: false,
            },
        ]
    }

    /// Store one level of domain values, returning its variables reference.
    /// Object values get a key preview and their own reference.
    fn store_domain_values(&mut self, entries: Vec<(String, Value)>) -> i64 {
        let variables = entries
            .into_iter()
            .map(|(name, value)| match value {
                Value::Object(fields) => {
                    let preview = format!(
                        "{{{}}}",
                        fields.keys().map(|key| format!("{key}: …")).join(", ")
                    );
                    let reference = self.store_domain_values(fields.into_iter().collect());
                    Variable {
                        name,
                        value: preview,
                        variables_reference: reference,
                    }
                }
                value => Variable {
                    name,
                    value: domain_value_to_string(&value),
                    variables_reference: 0,
                },
            })
            .collect_vec();
        self.store_variables(variables)
    }
}

/// Compact one-line rendering of a domain value.
pub fn domain_value_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => format!(
            "{{{}}}",
            items.iter().map(domain_value_to_string).join(", ")
        ),
        Value::Object(fields) => format!(
            "{{{}}}",
            fields
                .iter()
                .map(|(key, value)| format!("{key}: {}", domain_value_to_string(value)))
                .join(", ")
        ),
    }
}
