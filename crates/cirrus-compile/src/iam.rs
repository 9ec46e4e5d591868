//! IAM binding aggregation.

use serde::{Deserialize, Serialize};

use crate::error::{CompileResult, ConfigError};
use crate::service::BindingSpec;
use crate::trigger::EventTrigger;

/// Role granted to `allUsers` for unauthenticated HTTP invocation.
pub const INVOKER_ROLE: &str = "roles/cloudfunctions.invoker";

/// Principal representing every caller, authenticated or not.
pub const ALL_USERS: &str = "allUsers";

/// A role and the principals holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamBinding {
    /// Role name.
    pub role: String,
    /// Members, without duplicates, in first-seen order.
    pub members: Vec<String>,
}

impl IamBinding {
    /// Create a binding.
    #[must_use]
    pub fn new(role: impl Into<String>, members: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            role: role.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    /// The synthesized `allUsers` invoker binding.
    #[must_use]
    pub fn public_invoker() -> Self {
        Self::new(INVOKER_ROLE, [ALL_USERS])
    }

    /// Convert declared bindings, rejecting any without a role or members.
    ///
    /// `owner` names the declaring scope in error messages.
    pub fn parse_all(owner: &str, specs: &[BindingSpec]) -> CompileResult<Vec<Self>> {
        specs
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                Self::parse(spec).map_err(|reason| ConfigError::InvalidIamBinding {
                    owner: owner.to_owned(),
                    index,
                    reason,
                })
            })
            .collect()
    }

    fn parse(spec: &BindingSpec) -> Result<Self, &'static str> {
        let role = match spec.role.as_deref() {
            Some(role) if !role.is_empty() => role,
            _ => return Err("the binding has no role"),
        };
        match spec.members.as_deref() {
            None => Err("the binding has no members"),
            Some([]) => Err("the binding has 0 members"),
            Some(members) => Ok(Self::new(role, members.iter().cloned())),
        }
    }
}

/// Merges function, provider and synthesized bindings into one entry per role.
#[derive(Debug, Clone, Copy, Default)]
pub struct IamBindingAggregator;

impl IamBindingAggregator {
    /// Aggregate the bindings for one function.
    ///
    /// Sources are read in order: function bindings, provider bindings, then
    /// the public invoker binding when `allow_unauthenticated` is set and the
    /// trigger is HTTP. Members for a role are unioned across all sources.
    /// Roles keep the order of their first appearance.
    #[must_use]
    pub fn aggregate(
        &self,
        trigger: &EventTrigger,
        function: &[IamBinding],
        provider: &[IamBinding],
        allow_unauthenticated: bool,
    ) -> Vec<IamBinding> {
        let synthesized = (allow_unauthenticated && trigger.is_http()).then(IamBinding::public_invoker);

        let mut merged: Vec<IamBinding> = Vec::new();
        for binding in function.iter().chain(provider).chain(synthesized.as_ref()) {
            let entry = match merged.iter().position(|b| b.role == binding.role) {
                Some(pos) => &mut merged[pos],
                None => {
                    merged.push(IamBinding {
                        role: binding.role.clone(),
                        members: Vec::new(),
                    });
                    let last = merged.len() - 1;
                    &mut merged[last]
                }
            };
            for member in &binding.members {
                if !entry.members.contains(member) {
                    entry.members.push(member.clone());
                }
            }
        }
        merged
    }
}
