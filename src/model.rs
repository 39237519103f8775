//! Users, groups and the subtrees they live in.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{config::Config, error::Error};

/// One of the fixed locations of managed entries in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subtree {
	/// Users of the web console
	WebUiUsers,
	/// Groups of the web console
	WebUiGroups,
	/// Users of the messaging server
	MessagingUsers,
	/// Groups of the messaging server
	MessagingGroups,
}

impl Subtree {
	/// All subtrees.
	pub const ALL: [Self; 4] =
		[Self::WebUiUsers, Self::WebUiGroups, Self::MessagingUsers, Self::MessagingGroups];

	/// Whether entries of this subtree are groups.
	#[must_use]
	pub const fn is_group_subtree(self) -> bool {
		matches!(self, Self::WebUiGroups | Self::MessagingGroups)
	}

	/// The subtree holding the groups entries of this subtree can belong to.
	#[must_use]
	pub const fn group_context(self) -> Self {
		match self {
			Self::WebUiUsers | Self::WebUiGroups => Self::WebUiGroups,
			Self::MessagingUsers | Self::MessagingGroups => Self::MessagingGroups,
		}
	}

	/// Whether this subtree belongs to the messaging namespace.
	#[must_use]
	pub const fn is_messaging(self) -> bool {
		matches!(self, Self::MessagingUsers | Self::MessagingGroups)
	}

	/// The DN of the subtree.
	#[must_use]
	pub fn base(self, config: &Config) -> &str {
		let contexts = &config.contexts;
		match self {
			Self::WebUiUsers => &contexts.webui_users,
			Self::WebUiGroups => &contexts.webui_groups,
			Self::MessagingUsers => &contexts.messaging_users,
			Self::MessagingGroups => &contexts.messaging_groups,
		}
	}

	/// The maximum length of an id in this subtree.
	#[must_use]
	pub const fn max_id_length(self, config: &Config) -> usize {
		if self.is_messaging() {
			config.limits.max_messaging_id_length
		} else {
			config.limits.max_id_length
		}
	}

	/// Check that `id` may name an entry of this subtree.
	pub fn validate_id(self, id: &str, config: &Config) -> Result<(), Error> {
		if id.is_empty() {
			return Err(Error::InvalidIdentifier("id must not be empty".to_owned()));
		}
		if id.trim().is_empty() {
			return Err(Error::InvalidIdentifier("id must not be blank".to_owned()));
		}
		if id.starts_with(char::is_whitespace) || id.ends_with(char::is_whitespace) {
			return Err(Error::InvalidIdentifier(format!(
				"`{id}` must not start or end with whitespace"
			)));
		}
		let max = self.max_id_length(config);
		if id.chars().count() > max {
			return Err(Error::InvalidIdentifier(format!("id is longer than {max} characters")));
		}
		Ok(())
	}
}

impl fmt::Display for Subtree {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::WebUiUsers => "webui users",
			Self::WebUiGroups => "webui groups",
			Self::MessagingUsers => "messaging users",
			Self::MessagingGroups => "messaging groups",
		})
	}
}

/// A user or group as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
	/// Short name, unique within the subtree
	pub id: String,
	/// Free text description
	#[serde(default)]
	pub description: Option<String>,
	/// Groups the entry belongs to
	#[serde(default)]
	pub groups: Vec<String>,
	/// Only present for users that are system administrators
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub employee_number: Option<u16>,
	/// Set when some memberships could not be applied
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub warning: Option<MembershipWarning>,
}

/// Input for creating a user or group.
#[derive(Clone, Default, Deserialize)]
pub struct NewEntry {
	/// Short name of the new entry
	pub id: String,
	/// Password of a new user, ignored for groups
	#[serde(default)]
	pub password: Option<String>,
	/// Optional description
	#[serde(default)]
	pub description: Option<String>,
	/// Groups the entry should belong to
	#[serde(default)]
	pub groups: Vec<String>,
}

impl fmt::Debug for NewEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NewEntry")
			.field("id", &self.id)
			.field("password", &self.password.as_ref().map(|_| "<redacted>"))
			.field("description", &self.description)
			.field("groups", &self.groups)
			.finish()
	}
}

/// Changes to apply to an existing entry. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryChanges {
	/// New short name; renames the entry when it differs from the current one
	#[serde(default)]
	pub id: Option<String>,
	/// New description; an empty string removes it
	#[serde(default)]
	pub description: Option<String>,
	/// Full replacement of the groups the entry belongs to
	#[serde(default)]
	pub groups: Option<Vec<String>>,
}

/// Why a membership change was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum SkipReason {
	/// The group does not exist
	GroupNotFound,
	/// The directory rejected the change
	Directory(String),
}

impl fmt::Display for SkipReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::GroupNotFound => f.write_str("group not found"),
			Self::Directory(err) => f.write_str(err),
		}
	}
}

/// A group whose membership change was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedGroup {
	/// Id of the group
	pub group: String,
	/// What went wrong
	#[serde(flatten)]
	pub reason: SkipReason,
}

/// Partial membership failure reported alongside an otherwise successful
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipWarning {
	/// Human readable summary
	pub message: String,
	/// The groups that were skipped
	pub skipped: Vec<SkippedGroup>,
}

impl MembershipWarning {
	/// Build the warning for `id`, or `None` if nothing was skipped.
	#[must_use]
	pub fn new(id: &str, skipped: Vec<SkippedGroup>) -> Option<Self> {
		if skipped.is_empty() {
			return None;
		}
		let groups: Vec<&str> = skipped.iter().map(|s| s.group.as_str()).collect();
		let message = format!(
			"{id} was saved, but its membership in the following groups was skipped: {}",
			groups.join(", ")
		);
		Some(Self { message, skipped })
	}
}
