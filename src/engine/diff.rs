//! Diff between declared resources and recorded stack state.
//!
//! An instance's label and tags can be changed in place. Every other input
//! (image, region, type, swap, private IP, root credential) forces a
//! replacement. The credential is compared through its recorded digest and
//! never appears in a [`FieldChange`].

use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::config::DeclarationHasher;
use crate::program::{InstanceInputs, ResourceDeclaration};

use super::state::{ResourceState, StackState};

/// Shown in place of credential values.
const REDACTED: &str = "[REDACTED]";

/// Action the engine takes on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffAction {
    /// Resource needs to be created.
    Create,
    /// Resource is updated in place.
    Update,
    /// Resource is deleted and created again.
    Replace,
    /// Resource is no longer declared.
    Delete,
    /// Resource is unchanged.
    Same,
}

/// One changed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Input that differs.
    pub field: &'static str,
    /// Recorded value.
    pub old_value: String,
    /// Declared value.
    pub new_value: String,
}

/// Planned step for one resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource name.
    pub name: String,
    /// What to do.
    pub action: DiffAction,
    /// Changed inputs, for updates and replacements.
    pub changes: Vec<FieldChange>,
}

/// The complete plan for one `up`.
#[derive(Debug, Default)]
pub struct StackDiff {
    /// Steps in execution order: declared resources first, then deletions.
    pub steps: Vec<ResourceDiff>,
}

/// Computes the steps needed to move `state` to `declared`.
#[must_use]
pub fn compute_diff(declared: &[ResourceDeclaration], state: &StackState) -> StackDiff {
    let hasher = DeclarationHasher::new();
    let mut steps = Vec::with_capacity(declared.len());

    for decl in declared {
        let step = match state.resources.get(&decl.name) {
            None => {
                debug!("{} needs to be created", decl.name);
                ResourceDiff {
                    name: decl.name.clone(),
                    action: DiffAction::Create,
                    changes: Vec::new(),
                }
            }
            Some(recorded) => diff_existing(&hasher, decl, recorded),
        };
        steps.push(step);
    }

    let declared_names: HashSet<&str> = declared.iter().map(|d| d.name.as_str()).collect();
    for name in state.resources.keys() {
        if !declared_names.contains(name.as_str()) {
            debug!("{name} is no longer declared");
            steps.push(ResourceDiff {
                name: name.clone(),
                action: DiffAction::Delete,
                changes: Vec::new(),
            });
        }
    }

    StackDiff { steps }
}

fn diff_existing(
    hasher: &DeclarationHasher,
    decl: &ResourceDeclaration,
    recorded: &ResourceState,
) -> ResourceDiff {
    let same_type = recorded.provider == decl.provider && recorded.kind == decl.kind;
    // State written before credentials were tracked has no digest to compare
    let credential_changed = recorded
        .credential
        .as_ref()
        .is_some_and(|c| !hasher.credential_matches(c, &decl.args.root_pass));

    if same_type
        && !credential_changed
        && recorded.input_hash == hasher.hash_inputs(&decl.args.inputs)
    {
        return ResourceDiff {
            name: decl.name.clone(),
            action: DiffAction::Same,
            changes: Vec::new(),
        };
    }

    let mut changes = field_changes(&recorded.inputs, &decl.args.inputs);
    if credential_changed {
        changes.push(FieldChange {
            field: "root_pass",
            old_value: REDACTED.to_string(),
            new_value: REDACTED.to_string(),
        });
    }
    let in_place = changes
        .iter()
        .all(|c| matches!(c.field, "label" | "tags"));

    let action = if !same_type || !in_place {
        DiffAction::Replace
    } else if changes.is_empty() {
        DiffAction::Same
    } else {
        DiffAction::Update
    };

    debug!("{} needs {action} ({} changed inputs)", decl.name, changes.len());
    ResourceDiff {
        name: decl.name.clone(),
        action,
        changes,
    }
}

fn field_changes(old: &InstanceInputs, new: &InstanceInputs) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let mut check = |field: &'static str, old_value: String, new_value: String| {
        if old_value != new_value {
            changes.push(FieldChange {
                field,
                old_value,
                new_value,
            });
        }
    };

    check("image", old.image.clone(), new.image.clone());
    check("label", old.label.clone(), new.label.clone());
    check("private_ip", old.private_ip.to_string(), new.private_ip.to_string());
    check("region", old.region.clone(), new.region.clone());
    check("type", old.instance_type.clone(), new.instance_type.clone());
    check("swap_size", old.swap_size.to_string(), new.swap_size.to_string());

    // Tags are a set on the provider side
    let old_tags: BTreeSet<&String> = old.tags.iter().collect();
    let new_tags: BTreeSet<&String> = new.tags.iter().collect();
    if old_tags != new_tags {
        changes.push(FieldChange {
            field: "tags",
            old_value: old.tags.join(","),
            new_value: new.tags.join(","),
        });
    }

    changes
}

impl StackDiff {
    /// Returns true if any step changes the stack.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.steps.iter().any(|s| s.action != DiffAction::Same)
    }

    /// Number of steps with the given action.
    #[must_use]
    pub fn count(&self, action: DiffAction) -> usize {
        self.steps.iter().filter(|s| s.action == action).count()
    }
}

impl std::fmt::Display for DiffAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Same => "same",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.action)?;
        if !self.changes.is_empty() {
            let fields: Vec<_> = self.changes.iter().map(|c| c.field).collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{INSTANCE_KIND, InstanceArgs};
    use chrono::Utc;
    use secrecy::SecretString;

    fn inputs() -> InstanceInputs {
        InstanceInputs {
            image: String::from("linode/ubuntu18.04"),
            label: String::from("carlos-dev"),
            private_ip: false,
            region: String::from("us-east"),
            instance_type: String::from("g6-nanode-1"),
            swap_size: 512,
            tags: vec![String::from("slack-bot"), String::from("carlos")],
        }
    }

    fn declare(name: &str, inputs: InstanceInputs) -> ResourceDeclaration {
        ResourceDeclaration {
            name: name.to_string(),
            provider: String::from("linode"),
            kind: INSTANCE_KIND.to_string(),
            args: InstanceArgs {
                inputs,
                root_pass: SecretString::from("correct-horse-battery"),
            },
        }
    }

    fn record(state: &mut StackState, name: &str, inputs: InstanceInputs) {
        let now = Utc::now();
        state.set_resource(ResourceState {
            name: name.to_string(),
            provider: String::from("linode"),
            kind: INSTANCE_KIND.to_string(),
            id: String::from("1001"),
            input_hash: DeclarationHasher::new().hash_inputs(&inputs),
            inputs,
            credential: Some(
                DeclarationHasher::new()
                    .credential_digest(&SecretString::from("correct-horse-battery")),
            ),
            outputs: Default::default(),
            created_at: now,
            updated_at: now,
        });
    }

    #[test]
    fn test_empty_state_creates() {
        let state = StackState::new("s", "p");
        let diff = compute_diff(&[declare("vm", inputs())], &state);
        assert_eq!(diff.count(DiffAction::Create), 1);
        assert!(diff.has_changes());
    }

    #[test]
    fn test_unchanged_is_same() {
        let mut state = StackState::new("s", "p");
        record(&mut state, "vm", inputs());
        let diff = compute_diff(&[declare("vm", inputs())], &state);
        assert_eq!(diff.count(DiffAction::Same), 1);
        assert!(!diff.has_changes());
    }

    #[test]
    fn test_label_and_tags_update_in_place() {
        let mut state = StackState::new("s", "p");
        record(&mut state, "vm", inputs());

        let mut changed = inputs();
        changed.label = String::from("carlos-dev-2");
        changed.tags.push(String::from("extra"));

        let diff = compute_diff(&[declare("vm", changed)], &state);
        let step = &diff.steps[0];
        assert_eq!(step.action, DiffAction::Update);
        assert_eq!(step.changes.len(), 2);
    }

    #[test]
    fn test_image_change_replaces() {
        let mut state = StackState::new("s", "p");
        record(&mut state, "vm", inputs());

        let mut changed = inputs();
        changed.image = String::from("linode/ubuntu22.04");
        changed.label = String::from("carlos-dev-2");

        let diff = compute_diff(&[declare("vm", changed)], &state);
        assert_eq!(diff.steps[0].action, DiffAction::Replace);
        assert_eq!(diff.steps[0].to_string(), "vm: replace (image, label)");
    }

    #[test]
    fn test_new_credential_replaces_without_showing_it() {
        let mut state = StackState::new("s", "p");
        record(&mut state, "vm", inputs());

        let mut decl = declare("vm", inputs());
        decl.args.root_pass = SecretString::from("battery-staple-horse");

        let diff = compute_diff(&[decl], &state);
        let step = &diff.steps[0];
        assert_eq!(step.action, DiffAction::Replace);
        assert_eq!(step.to_string(), "vm: replace (root_pass)");
        assert!(step.changes.iter().all(|c| c.old_value == REDACTED && c.new_value == REDACTED));
    }

    #[test]
    fn test_state_without_credential_digest_is_same() {
        let mut state = StackState::new("s", "p");
        record(&mut state, "vm", inputs());
        state.resources.get_mut("vm").unwrap().credential = None;

        let mut decl = declare("vm", inputs());
        decl.args.root_pass = SecretString::from("battery-staple-horse");
        assert!(!compute_diff(&[decl], &state).has_changes());
    }

    #[test]
    fn test_undeclared_resources_are_deleted_last() {
        let mut state = StackState::new("s", "p");
        record(&mut state, "old-vm", inputs());

        let diff = compute_diff(&[declare("vm", inputs())], &state);
        assert_eq!(diff.steps.len(), 2);
        assert_eq!(diff.steps[0].action, DiffAction::Create);
        assert_eq!(diff.steps[1].name, "old-vm");
        assert_eq!(diff.steps[1].action, DiffAction::Delete);
    }
}
