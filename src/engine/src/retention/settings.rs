//! Operator-edited retention settings and their save-time sanitization.

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::period::RetentionPeriod;
use crate::model::{ContentType, GroupKey};

/// Well-known key of the settings blob in the host's option storage.
pub const SETTINGS_KEY: &str = "sunset_settings";

/// Retention settings as stored by the host.
///
/// Missing fields deserialize to disabled periods so partially saved blobs
/// merge with the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Disable users inactive for this long.
    #[serde(default)]
    pub user_disable: RetentionPeriod,

    /// Delete users this long after they were disabled.
    #[serde(default)]
    pub user_delete: RetentionPeriod,

    /// Archive posts published this long ago.
    #[serde(default)]
    pub post_archive: RetentionPeriod,

    /// Archive pages published this long ago.
    #[serde(default)]
    pub page_archive: RetentionPeriod,

    /// Per-group overrides of the user policies.
    #[serde(default, deserialize_with = "lenient_role_policies")]
    pub role_policies: BTreeMap<GroupKey, RolePolicy>,
}

impl RetentionSettings {
    pub fn archive_period(&self, content_type: ContentType) -> RetentionPeriod {
        match content_type {
            ContentType::Post => self.post_archive,
            ContentType::Page => self.page_archive,
        }
    }
}

/// Group-specific override of the user disable/delete policies.
///
/// A zero period means "no override" for that action; the group then
/// follows the default for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RolePolicy {
    pub user_disable: RetentionPeriod,
    pub user_delete: RetentionPeriod,
}

impl<'de> Deserialize<'de> for RolePolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Fields {
            #[serde(default)]
            user_disable: RetentionPeriod,
            #[serde(default)]
            user_delete: RetentionPeriod,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawPolicy {
            Fields(Fields),
            Other(IgnoredAny),
        }

        Ok(match RawPolicy::deserialize(deserializer)? {
            RawPolicy::Fields(Fields {
                user_disable,
                user_delete,
            }) => RolePolicy {
                user_disable,
                user_delete,
            },
            RawPolicy::Other(_) => RolePolicy::default(),
        })
    }
}

/// Anything but a map of group keys reads as "no overrides".
fn lenient_role_policies<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<GroupKey, RolePolicy>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPolicies {
        Map(BTreeMap<GroupKey, RolePolicy>),
        Other(IgnoredAny),
    }

    Ok(match RawPolicies::deserialize(deserializer)? {
        RawPolicies::Map(policies) => policies,
        RawPolicies::Other(_) => BTreeMap::new(),
    })
}

impl RolePolicy {
    /// True when neither action is overridden.
    pub fn is_empty(&self) -> bool {
        !self.user_disable.has_effect() && !self.user_delete.has_effect()
    }
}

/// Problems corrected while sanitizing settings. Saving still succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsWarning {
    /// The default delete policy was set without a default disable policy.
    DeleteWithoutDisable,
    /// A group delete override has no disable policy to follow.
    GroupDeleteWithoutDisable { group: GroupKey },
    /// A group override names a group the host does not know.
    UnknownGroup { group: GroupKey },
}

impl fmt::Display for SettingsWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsWarning::DeleteWithoutDisable => f.write_str(
                "Users must be disabled before they can be deleted. The delete policy has been cleared.",
            ),
            SettingsWarning::GroupDeleteWithoutDisable { group } => write!(
                f,
                "Users in group '{group}' must be disabled before they can be deleted. The group delete policy has been cleared."
            ),
            SettingsWarning::UnknownGroup { group } => {
                write!(f, "Group '{group}' does not exist. Its override has been removed.")
            }
        }
    }
}

/// Sanitized settings plus the corrections that were applied.
#[derive(Debug, Clone)]
pub struct SanitizedSettings {
    pub settings: RetentionSettings,
    pub warnings: Vec<SettingsWarning>,
}

/// Normalize operator input before it is saved.
///
/// - group keys are trimmed and lowercased
/// - overrides for unknown groups are dropped (skipped when `known_groups`
///   is empty, i.e. the host cannot enumerate groups)
/// - a delete policy without an effective disable policy is cleared
/// - overrides left without any effective period are dropped
pub fn sanitize_settings(
    input: RetentionSettings,
    known_groups: &BTreeSet<GroupKey>,
) -> SanitizedSettings {
    let mut settings = input;
    let mut warnings = Vec::new();

    if !settings.user_disable.has_effect() && settings.user_delete.has_effect() {
        settings.user_delete.quantity = 0;
        warnings.push(SettingsWarning::DeleteWithoutDisable);
    }

    let default_disable = settings.user_disable;
    let mut role_policies = BTreeMap::new();

    for (raw_group, mut policy) in std::mem::take(&mut settings.role_policies) {
        let group = raw_group.trim().to_ascii_lowercase();
        if group.is_empty() {
            continue;
        }

        if !known_groups.is_empty() && !known_groups.contains(&group) {
            warnings.push(SettingsWarning::UnknownGroup { group });
            continue;
        }

        if policy.user_delete.has_effect()
            && !policy.user_disable.has_effect()
            && !default_disable.has_effect()
        {
            policy.user_delete.quantity = 0;
            warnings.push(SettingsWarning::GroupDeleteWithoutDisable {
                group: group.clone(),
            });
        }

        if !policy.is_empty() {
            role_policies.insert(group, policy);
        }
    }

    settings.role_policies = role_policies;

    SanitizedSettings { settings, warnings }
}
