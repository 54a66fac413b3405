//! Policy resolution with per-group overrides.
//!
//! Each user action (disable, delete) is resolved independently into an
//! ordered list of partitions of the subject space:
//!
//! 1. One partition per overridden group (`group ∈ {g}`), in group-key order
//! 2. The default remainder (`group ∉ excluded ∪ overridden`)
//!
//! Override and default partitions never overlap, and together with the
//! excluded groups they cover every subject.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::period::RetentionPeriod;
use super::settings::{RetentionSettings, RolePolicy};
use crate::model::GroupKey;

/// User-facing retention actions that support group overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAction {
    Disable,
    Delete,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::Disable => "disable",
            UserAction::Delete => "delete",
        }
    }

    fn default_period(&self, settings: &RetentionSettings) -> RetentionPeriod {
        match self {
            UserAction::Disable => settings.user_disable,
            UserAction::Delete => settings.user_delete,
        }
    }

    fn override_period(&self, policy: &RolePolicy) -> RetentionPeriod {
        match self {
            UserAction::Disable => policy.user_disable,
            UserAction::Delete => policy.user_delete,
        }
    }
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of a resolved policy, for auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PolicySource {
    /// Default policy from the settings.
    Default,
    /// Override for the named group.
    Group(GroupKey),
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicySource::Default => f.write_str("default"),
            PolicySource::Group(group) => write!(f, "group:{group}"),
        }
    }
}

/// Group filter applied at the store level.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupConstraint {
    /// Only subjects in this group, when set.
    pub include: Option<GroupKey>,
    /// No subject in any of these groups.
    pub exclude: BTreeSet<GroupKey>,
}

impl GroupConstraint {
    /// Whether a subject with these memberships passes the filter.
    pub fn admits(&self, groups: &BTreeSet<GroupKey>) -> bool {
        if let Some(group) = &self.include
            && !groups.contains(group)
        {
            return false;
        }
        groups.is_disjoint(&self.exclude)
    }
}

/// One disjoint slice of the subject space with its effective period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub groups: GroupConstraint,
    pub period: RetentionPeriod,
    pub source: PolicySource,
}

impl Partition {
    pub fn display(&self) -> String {
        format!("source={}, period={}", self.source, self.period)
    }
}

/// Resolves effective user policies from settings and host group data.
#[derive(Debug)]
pub struct PolicyResolver<'a> {
    settings: &'a RetentionSettings,
    known_groups: &'a BTreeSet<GroupKey>,
    excluded_groups: &'a BTreeSet<GroupKey>,
}

impl<'a> PolicyResolver<'a> {
    /// An empty `known_groups` set means the host cannot enumerate groups;
    /// every override is then taken at face value.
    pub fn new(
        settings: &'a RetentionSettings,
        known_groups: &'a BTreeSet<GroupKey>,
        excluded_groups: &'a BTreeSet<GroupKey>,
    ) -> Self {
        Self {
            settings,
            known_groups,
            excluded_groups,
        }
    }

    /// Groups with an effective override for `action`, in key order.
    pub fn overridden_groups(&self, action: UserAction) -> BTreeSet<GroupKey> {
        self.overrides(action).map(|(group, _)| group.clone()).collect()
    }

    /// Partitions for `action`: overrides first, then the default remainder.
    ///
    /// The default partition is always present, even when its period has no
    /// effect; the enforcer skips partitions without a threshold.
    pub fn partitions(&self, action: UserAction) -> Vec<Partition> {
        let mut partitions: Vec<Partition> = self
            .overrides(action)
            .map(|(group, period)| Partition {
                groups: GroupConstraint {
                    include: Some(group.clone()),
                    exclude: self.excluded_groups.clone(),
                },
                period,
                source: PolicySource::Group(group.clone()),
            })
            .collect();

        let mut exclude = self.excluded_groups.clone();
        exclude.extend(self.overridden_groups(action));

        partitions.push(Partition {
            groups: GroupConstraint {
                include: None,
                exclude,
            },
            period: action.default_period(self.settings),
            source: PolicySource::Default,
        });

        partitions
    }

    /// Policy that applies to a subject with the given memberships.
    ///
    /// Returns `None` for subjects in an excluded group. A subject in several
    /// overridden groups is reachable from each of their partitions, so the
    /// shortest effective override wins.
    pub fn effective_period(
        &self,
        action: UserAction,
        groups: &BTreeSet<GroupKey>,
    ) -> Option<(RetentionPeriod, PolicySource)> {
        if !groups.is_disjoint(self.excluded_groups) {
            return None;
        }

        let strictest = self
            .overrides(action)
            .filter(|(group, _)| groups.contains(*group))
            .min_by_key(|(_, period)| period.to_seconds());

        match strictest {
            Some((group, period)) => Some((period, PolicySource::Group(group.clone()))),
            None => Some((action.default_period(self.settings), PolicySource::Default)),
        }
    }

    fn overrides(
        &self,
        action: UserAction,
    ) -> impl Iterator<Item = (&'a GroupKey, RetentionPeriod)> + '_ {
        self.settings
            .role_policies
            .iter()
            .filter(|(group, _)| {
                (self.known_groups.is_empty() || self.known_groups.contains(*group))
                    && !self.excluded_groups.contains(*group)
            })
            .map(move |(group, policy)| (group, action.override_period(policy)))
            .filter(|(_, period)| period.has_effect())
    }
}
