//! Generated service account and custom roles for provider IAM permissions.
//!
//! Each permission group becomes one custom role plus one membership
//! resource granting that role to the generated service account on the
//! group's target.

use serde_json::json;

use crate::error::{CompileResult, ConfigError};
use crate::service::{DeploymentContext, PermissionSpec, ProviderDefaults, ScopedPermissions};
use crate::template::Resource;

const SERVICE_ACCOUNT_TYPE: &str = "iam.v1.serviceAccount";
const CUSTOM_ROLE_TYPE: &str = "gcp-types/iam-v1:projects.roles";

const ROLE_PREFIX_MAX: usize = 48;
const ROLE_NAME_MAX: usize = 64;

/// Resources and identity produced from provider IAM permissions.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedIdentity {
    /// Email of the generated service account; functions run as it.
    pub service_account_email: String,
    /// Service account, custom role and membership resources, in that order.
    pub resources: Vec<Resource>,
}

/// Builds the generated identity resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct IamRoleGenerator;

impl IamRoleGenerator {
    /// Generate resources for `provider.iam.permissions`.
    ///
    /// Returns `None` when no permissions are declared. Plain permission
    /// strings are collected into one project-scoped group placed before
    /// the scoped groups.
    pub fn generate(
        &self,
        ctx: &DeploymentContext,
        provider: &ProviderDefaults,
    ) -> CompileResult<Option<GeneratedIdentity>> {
        let declared = &provider.iam.permissions;
        if declared.is_empty() {
            return Ok(None);
        }
        if provider.service_account_email.is_some() {
            return Err(ConfigError::ConflictingServiceAccount);
        }

        let service_name = ctx.service_with_stage();
        let account_id = format!("sls-{service_name}");
        let email = format!("{account_id}@{}.iam.gserviceaccount.com", ctx.project);

        let mut resources = vec![Resource::new(
            SERVICE_ACCOUNT_TYPE,
            &account_id,
            json!({
                "accountId": account_id,
                "displayName": account_id,
                "description": format!("Generated service account for project {service_name}"),
            }),
        )];

        let mut plain = Vec::new();
        let mut scoped = Vec::new();
        for permission in declared {
            match permission {
                PermissionSpec::Permission(p) => plain.push(p.clone()),
                PermissionSpec::Scoped(group) => scoped.push(group.clone()),
            }
        }

        let project_group = (!plain.is_empty()).then(|| ScopedPermissions {
            permissions: plain,
            project_id: Some(ctx.project.clone()),
            ..ScopedPermissions::default()
        });

        for group in project_group.iter().chain(&scoped) {
            let target = MembershipTarget::of(group)?;
            let role = custom_role(&ctx.project, &service_name, &target, group);
            let member = membership(&ctx.project, &email, &role.name, &target);
            resources.push(role);
            resources.push(member);
        }

        Ok(Some(GeneratedIdentity {
            service_account_email: email,
            resources,
        }))
    }
}

/// The resource a permission group is granted on.
#[derive(Debug, Clone, Copy)]
enum MembershipTarget<'a> {
    Bucket(&'a str),
    Organization(&'a str),
    Folder(&'a str),
    Project(&'a str),
    Function(&'a str),
}

impl<'a> MembershipTarget<'a> {
    fn of(group: &'a ScopedPermissions) -> CompileResult<Self> {
        if let Some(v) = &group.bucket {
            Ok(Self::Bucket(v))
        } else if let Some(v) = &group.organization_id {
            Ok(Self::Organization(v))
        } else if let Some(v) = &group.folder_id {
            Ok(Self::Folder(v))
        } else if let Some(v) = &group.project_id {
            Ok(Self::Project(v))
        } else if let Some(v) = &group.cloud_function {
            Ok(Self::Function(v))
        } else {
            Err(ConfigError::UnsupportedIamTarget {
                permissions: group.permissions.clone(),
            })
        }
    }

    fn role_suffix(self) -> String {
        match self {
            Self::Bucket(v) => format!("gcs_{v}"),
            Self::Organization(v) => format!("org_{v}"),
            Self::Folder(v) => format!("fol_{v}"),
            Self::Project(v) => format!("pro_{v}"),
            Self::Function(v) => format!("gcf_{v}"),
        }
    }

    const fn binding_type(self) -> &'static str {
        match self {
            Self::Bucket(_) => "gcp-types/storage-v1:virtual.buckets.iamMemberBinding",
            Self::Organization(_) => {
                "gcp-types/cloudresourcemanager-v1:virtual.organizations.iamMemberBinding"
            }
            Self::Folder(_) => "gcp-types/cloudresourcemanager-v2:virtual.folders.iamMemberBinding",
            Self::Project(_) => {
                "gcp-types/cloudresourcemanager-v1:virtual.projects.iamMemberBinding"
            }
            Self::Function(_) => {
                "gcp-types/cloudfunctions-v1:virtual.projects.locations.functions.iamMemberBinding"
            }
        }
    }

    fn properties(self) -> serde_json::Map<String, serde_json::Value> {
        let mut props = serde_json::Map::new();
        match self {
            Self::Bucket(v) => props.insert("bucket".to_owned(), json!(v)),
            Self::Organization(v) | Self::Folder(v) | Self::Project(v) | Self::Function(v) => {
                props.insert("resource".to_owned(), json!(v))
            }
        };
        props
    }
}

/// Role names allow letters and underscores only, at most 64 characters.
fn role_name(service_name: &str, target: MembershipTarget<'_>) -> String {
    let prefix: String = service_name
        .chars()
        .take(ROLE_PREFIX_MAX)
        .map(|c| if c == '-' { '_' } else { c })
        .collect();
    let suffix: String = target
        .role_suffix()
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == '_')
        .take(ROLE_NAME_MAX.saturating_sub(prefix.len()))
        .collect();
    format!("{prefix}_{suffix}")
}

fn custom_role(
    project: &str,
    service_name: &str,
    target: &MembershipTarget<'_>,
    group: &ScopedPermissions,
) -> Resource {
    let name = role_name(service_name, *target);
    Resource::new(
        CUSTOM_ROLE_TYPE,
        &name,
        json!({
            "parent": format!("projects/{project}"),
            "roleId": name,
            "role": {
                "title": name,
                "description": format!("Generated IAM role for project {service_name}"),
                "stage": "GA",
                "includedPermissions": group.permissions,
            },
        }),
    )
}

fn membership(
    project: &str,
    email: &str,
    role_name: &str,
    target: &MembershipTarget<'_>,
) -> Resource {
    let mut props = target.properties();
    props.insert(
        "role".to_owned(),
        json!(format!("projects/{project}/roles/{role_name}")),
    );
    props.insert("member".to_owned(), json!(format!("serviceAccount:{email}")));
    Resource::new(
        target.binding_type(),
        format!("{role_name}_members"),
        props.into(),
    )
}
