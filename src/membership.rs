//! Reconciliation of group memberships.
//!
//! A membership is stored once, as a `member` value on the group. The groups
//! an entry should belong to come from the caller. Reconciling compares the
//! desired groups with a fresh reverse search for the entry's DN and applies
//! the difference, removals first. Groups that are missing or reject a change
//! are reported as [`SkippedGroup`]s instead of failing the whole operation.
use std::collections::{BTreeSet, HashSet};

use ldap3::Mod;
use tracing::{debug, warn};

use crate::{
	config::Config,
	directory::Directory,
	dn::{self, Dn, NAMING_ATTRIBUTE},
	entry::SearchEntryExt,
	error::Error,
	model::{SkipReason, SkippedGroup, Subtree},
};

/// Attribute of a group listing the DNs of its members
pub const MEMBER_ATTRIBUTE: &str = "member";

/// Whether the entry `id` of `subtree` is the built-in administrative user.
#[must_use]
pub fn is_immutable(config: &Config, subtree: Subtree, id: &str) -> bool {
	subtree == Subtree::WebUiUsers && id == config.admin.user_id
}

/// Reject a group that would become a member of itself.
pub fn check_self_membership<S: AsRef<str>>(
	subtree: Subtree,
	id: &str,
	desired: &[S],
) -> Result<(), Error> {
	if subtree.is_group_subtree() && desired.iter().any(|group| group.as_ref() == id) {
		return Err(Error::SelfMembershipNotAllowed(id.to_owned()));
	}
	Ok(())
}

/// How the entry being reconciled came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin<'a> {
	/// It was just created and cannot be a member of anything yet
	Created,
	/// It existed under its current id
	Existing,
	/// It was just renamed from the given id
	Renamed {
		/// The id before the rename
		from: &'a str,
	},
}

/// The entry whose memberships are reconciled.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
	/// Subtree holding the entry
	pub subtree: Subtree,
	/// Id of the entry, after any rename
	pub id: &'a str,
	/// How the entry came to be
	pub origin: Origin<'a>,
}

impl Target<'_> {
	/// The id the groups currently know the entry by.
	fn previous_id(&self) -> Option<&str> {
		match self.origin {
			Origin::Created => None,
			Origin::Existing => Some(self.id),
			Origin::Renamed { from } => Some(from),
		}
	}
}

/// The membership changes needed to get from the actual to the desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
	/// Groups to drop the previous DN from
	pub remove: BTreeSet<String>,
	/// Groups to add the current DN to
	pub add: BTreeSet<String>,
}

impl Plan {
	/// Compute the changes.
	///
	/// `desired` of `None` keeps the current groups. After a rename every
	/// actual membership is dropped and the desired ones are added for the new
	/// DN. `protected` names a group that is never touched.
	#[must_use]
	pub fn new(
		actual: &BTreeSet<String>,
		desired: Option<&BTreeSet<String>>,
		renamed: bool,
		protected: Option<&str>,
	) -> Self {
		let (mut remove, mut add) = match (renamed, desired) {
			(true, Some(desired)) => (actual.clone(), desired.clone()),
			(true, None) => (actual.clone(), actual.clone()),
			(false, Some(desired)) => {
				(actual - desired, desired.difference(actual).cloned().collect())
			}
			(false, None) => (BTreeSet::new(), BTreeSet::new()),
		};
		if let Some(group) = protected {
			remove.remove(group);
			add.remove(group);
		}
		Self { remove, add }
	}

	/// Whether nothing needs to change.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.remove.is_empty() && self.add.is_empty()
	}
}

/// What reconciling did.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
	/// Groups that listed the entry before
	pub before: BTreeSet<String>,
	/// Groups the previous DN was removed from
	pub removed: BTreeSet<String>,
	/// Groups the current DN was added to
	pub added: BTreeSet<String>,
	/// Groups that could not be changed
	pub skipped: Vec<SkippedGroup>,
	/// Groups that list the entry's current DN afterwards
	pub memberships: BTreeSet<String>,
}

/// Ids of the groups below `group_base` having `member_value` as a member.
async fn member_of<D: Directory + ?Sized>(
	dir: &mut D,
	group_base: &str,
	member_value: &str,
) -> Result<BTreeSet<String>, Error> {
	let groups = dir.search(group_base, MEMBER_ATTRIBUTE, member_value).await?;
	Ok(groups
		.iter()
		.filter_map(|group| group.attr_first(NAMING_ATTRIBUTE))
		.map(str::to_owned)
		.collect())
}

/// The groups that currently list the entry `id` of `subtree`.
pub async fn groups_of<D: Directory + ?Sized>(
	dir: &mut D,
	config: &Config,
	subtree: Subtree,
	id: &str,
) -> Result<BTreeSet<String>, Error> {
	let group_base = subtree.group_context().base(config);
	member_of(dir, group_base, &dn::reverse_match(subtree.base(config), id)).await
}

/// Drop `member` from each of `groups`, recording failures in `skipped`.
async fn remove_member<D: Directory + ?Sized>(
	dir: &mut D,
	group_base: &str,
	groups: &BTreeSet<String>,
	member: &Dn,
	skipped: &mut Vec<SkippedGroup>,
) -> BTreeSet<String> {
	let mut removed = BTreeSet::new();
	for group in groups {
		let group_dn = Dn::new(group_base, group);
		debug!(group = %group_dn, member = %member, "Removing member");
		let change = Mod::Delete(MEMBER_ATTRIBUTE.to_owned(), HashSet::from([member.to_string()]));
		match dir.modify_attributes(group_dn.as_str(), vec![change]).await {
			Ok(()) => {
				removed.insert(group.clone());
			}
			Err(err) => {
				warn!(group = %group_dn, "Failed to remove {member}: {err}");
				skipped.push(SkippedGroup {
					group: group.clone(),
					reason: SkipReason::Directory(err.to_string()),
				});
			}
		}
	}
	removed
}

/// Add `member` to each of `groups` that exists, recording failures in
/// `skipped`.
async fn add_member<D: Directory + ?Sized>(
	dir: &mut D,
	group_base: &str,
	groups: &BTreeSet<String>,
	member: &Dn,
	skipped: &mut Vec<SkippedGroup>,
) -> BTreeSet<String> {
	let mut added = BTreeSet::new();
	for group in groups {
		let reason = match dir.search(group_base, NAMING_ATTRIBUTE, group).await {
			Ok(found) if found.is_empty() => Some(SkipReason::GroupNotFound),
			Ok(_) => {
				let group_dn = Dn::new(group_base, group);
				debug!(group = %group_dn, member = %member, "Adding member");
				let change =
					Mod::Add(MEMBER_ATTRIBUTE.to_owned(), HashSet::from([member.to_string()]));
				match dir.modify_attributes(group_dn.as_str(), vec![change]).await {
					Ok(()) => None,
					Err(err) => Some(SkipReason::Directory(err.to_string())),
				}
			}
			Err(err) => Some(SkipReason::Directory(err.to_string())),
		};
		match reason {
			None => {
				added.insert(group.clone());
			}
			Some(reason) => {
				warn!("Skipping membership of {member} in {group}: {reason}");
				skipped.push(SkippedGroup { group: group.clone(), reason });
			}
		}
	}
	added
}

/// Bring the memberships of `target` in line with `desired`.
///
/// `desired` of `None` keeps the current groups, which after a rename means
/// moving them over to the new DN. Fails only if the group is asked to join
/// itself, in which case nothing is written, or if the current memberships
/// cannot be determined.
pub async fn reconcile<D: Directory + ?Sized>(
	dir: &mut D,
	config: &Config,
	target: &Target<'_>,
	desired: Option<&[String]>,
) -> Result<Reconciliation, Error> {
	if let Some(desired) = desired {
		check_self_membership(target.subtree, target.id, desired)?;
	}

	let base = target.subtree.base(config);
	let group_base = target.subtree.group_context().base(config);
	let previous_id = target.previous_id();

	let before = match previous_id {
		Some(id) => groups_of(dir, config, target.subtree, id).await?,
		None => BTreeSet::new(),
	};
	let desired: Option<BTreeSet<String>> = desired.map(|groups| groups.iter().cloned().collect());
	let renamed = matches!(target.origin, Origin::Renamed { .. });
	let protected = is_immutable(config, target.subtree, previous_id.unwrap_or(target.id))
		.then_some(config.admin.system_group.as_str());

	let plan = Plan::new(&before, desired.as_ref(), renamed, protected);
	if plan.is_empty() {
		debug!(id = target.id, "Memberships already up to date");
	}

	let previous_dn = Dn::new(base, previous_id.unwrap_or(target.id));
	let current_dn = Dn::new(base, target.id);
	let mut skipped = Vec::new();
	let removed = remove_member(dir, group_base, &plan.remove, &previous_dn, &mut skipped).await;
	let added = add_member(dir, group_base, &plan.add, &current_dn, &mut skipped).await;

	let mut memberships: BTreeSet<String> =
		if renamed { BTreeSet::new() } else { &before - &removed };
	memberships.extend(added.iter().cloned());

	Ok(Reconciliation { before, removed, added, skipped, memberships })
}

/// Remove every reference to the entry `id` of `subtree` from its groups.
pub async fn retire<D: Directory + ?Sized>(
	dir: &mut D,
	config: &Config,
	subtree: Subtree,
	id: &str,
) -> Result<Vec<SkippedGroup>, Error> {
	let groups = groups_of(dir, config, subtree, id).await?;
	let member = Dn::new(subtree.base(config), id);
	let mut skipped = Vec::new();
	remove_member(dir, subtree.group_context().base(config), &groups, &member, &mut skipped).await;
	Ok(skipped)
}
