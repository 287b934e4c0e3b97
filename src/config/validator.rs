//! Request validation.
//!
//! Field-level presence and range checks come from the `validator` derive on
//! the input types; this module adds the cross-field and provider rules and
//! produces the immutable [`VmRequest`].

use secrecy::SecretString;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::{Result, StackError};

use super::spec::{Intent, RequestInput, VmRequest, VmSpec};

/// OS tags with a public `linode/<tag>` image.
const KNOWN_OS_TAGS: &[&str] = &[
    "almalinux9",
    "alpine3.19",
    "alpine3.20",
    "arch",
    "centos-stream9",
    "centos7",
    "debian10",
    "debian11",
    "debian12",
    "fedora39",
    "fedora40",
    "opensuse15.6",
    "rocky9",
    "ubuntu18.04",
    "ubuntu20.04",
    "ubuntu22.04",
    "ubuntu24.04",
];

/// Linode limits on root passwords.
const ROOT_PASS_MIN: usize = 11;
const ROOT_PASS_MAX: usize = 128;

/// Linode limits on labels.
const LABEL_MIN: usize = 3;
const LABEL_MAX: usize = 64;

/// Validator for incoming requests.
#[derive(Debug)]
pub struct SpecValidator {
    /// Recognized (OS tag, image) pairs.
    pairings: HashSet<(String, String)>,
}

impl Default for SpecValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecValidator {
    /// Creates a validator that knows the public Linode images.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pairings: KNOWN_OS_TAGS
                .iter()
                .map(|os| ((*os).to_string(), format!("linode/{os}")))
                .collect(),
        }
    }

    /// Registers an additional OS tag / image pairing, e.g. a private image.
    pub fn add_pairing(&mut self, os_tag: impl Into<String>, image: impl Into<String>) {
        self.pairings.insert((os_tag.into(), image.into()));
    }

    /// Validates a request, taking the intent from the input.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpecification` if any rule fails or no intent is given.
    pub fn validate(&self, input: &RequestInput) -> Result<VmRequest> {
        let intent = input
            .intent
            .ok_or_else(|| StackError::invalid("intent must be 'create' or 'destroy'", "intent"))?;
        self.validate_with_intent(input, intent)
    }

    /// Validates a request with an intent resolved by the caller.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpecification` if any rule fails.
    pub fn validate_with_intent(&self, input: &RequestInput, intent: Intent) -> Result<VmRequest> {
        input.validate().map_err(|errors| first_error(&errors))?;

        let vm = &input.vm_options;
        let details = &input.stack_details;

        let swap_size = i16::try_from(vm.swap_size)
            .map_err(|_| StackError::invalid("swap size out of range", "vm_options.swap_size"))?;

        check_name(&details.username, "stack_details.username")?;
        check_name(&details.project_name, "stack_details.project_name")?;
        check_name(&details.instance_name, "stack_details.instance_name")?;
        check_label(&vm.label_name)?;

        let pass_len = vm.password.chars().count();
        if !(ROOT_PASS_MIN..=ROOT_PASS_MAX).contains(&pass_len) {
            return Err(StackError::invalid(
                format!("root password must be {ROOT_PASS_MIN}-{ROOT_PASS_MAX} characters"),
                "vm_options.password",
            ));
        }

        let pairing = (vm.operating_system.clone(), vm.image_name.clone());
        if !self.pairings.contains(&pairing) {
            return Err(StackError::invalid(
                format!(
                    "image '{}' is not a recognized image for operating system '{}'",
                    vm.image_name, vm.operating_system
                ),
                "vm_options.image_name",
            ));
        }

        debug!("Request from {} passed validation", input.requester_username);

        Ok(VmRequest {
            intent,
            spec: Arc::new(VmSpec {
                image: vm.image_name.clone(),
                os_tag: vm.operating_system.clone(),
                label: vm.label_name.clone(),
                private_ip: vm.private_ip,
                region: vm.region_name.clone(),
                root_pass: SecretString::from(vm.password.clone()),
                instance_type: vm.vm_type.clone(),
                swap_size,
                requester: input.requester_username.clone(),
                identity: details.username.clone(),
                project: details.project_name.clone(),
                instance_name: details.instance_name.clone(),
            }),
        })
    }
}

/// Converts the derive's error tree into a single field error.
fn first_error(errors: &ValidationErrors) -> StackError {
    fn walk(errors: &ValidationErrors, prefix: &str) -> Option<(String, String)> {
        let mut fields: Vec<_> = errors.errors().iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        for (field, kind) in fields {
            let path = if prefix.is_empty() {
                field.to_string()
            } else {
                format!("{prefix}.{field}")
            };
            match kind {
                ValidationErrorsKind::Field(list) => {
                    if let Some(err) = list.first() {
                        let message = err
                            .message
                            .as_ref()
                            .map_or_else(|| err.code.to_string(), ToString::to_string);
                        return Some((path, message));
                    }
                }
                ValidationErrorsKind::Struct(inner) => {
                    if let Some(found) = walk(inner, &path) {
                        return Some(found);
                    }
                }
                ValidationErrorsKind::List(_) => {}
            }
        }
        None
    }

    walk(errors, "").map_or_else(
        || StackError::InvalidSpecification {
            message: errors.to_string(),
            field: None,
        },
        |(field, message)| StackError::invalid(message, field),
    )
}

/// Names become stack names and file names.
fn check_name(name: &str, field: &str) -> Result<()> {
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with(['.', '-']);
    if valid {
        Ok(())
    } else {
        Err(StackError::invalid(
            format!("'{name}' may only contain letters, digits, '-', '_' and '.'"),
            field,
        ))
    }
}

fn check_label(label: &str) -> Result<()> {
    let len = label.len();
    let starts_alnum = label.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let charset = label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if (LABEL_MIN..=LABEL_MAX).contains(&len) && starts_alnum && charset {
        Ok(())
    } else {
        Err(StackError::invalid(
            format!(
                "label '{label}' must be {LABEL_MIN}-{LABEL_MAX} characters of letters, digits, '-', '_' or '.', starting with a letter or digit"
            ),
            "vm_options.label_name",
        ))
    }
}
