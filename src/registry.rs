//! Creating, modifying, deleting and listing users and groups.
//!
//! Each [`Registry`] operation opens its own directory session, runs a fixed
//! sequence of directory calls and closes the session again, whether the
//! operation succeeded or not. Operations that write are serialized through
//! one lock per registry, listing is not.
use std::{collections::HashSet, sync::Arc};

use ldap3::Mod;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::{
	config::Config,
	directory::{Attributes, Connector, Directory, SearchEntry},
	dn::{Dn, NAMING_ATTRIBUTE},
	entry::SearchEntryExt,
	error::Error,
	hasher::Hasher,
	identity,
	ldap::LdapConnector,
	listing::{self, DESCRIPTION_ATTRIBUTE, EMPLOYEE_NUMBER_ATTRIBUTE},
	membership::{self, Origin, Reconciliation, Target, MEMBER_ATTRIBUTE},
	model::{Entry, EntryChanges, MembershipWarning, NewEntry, Subtree},
};

/// Attribute listing the object classes of an entry
const OBJECT_CLASS_ATTRIBUTE: &str = "objectClass";
/// Attribute holding the hashed password of a user
const PASSWORD_ATTRIBUTE: &str = "userPassword";
/// Mirrors of the id carried by users
const MIRROR_ATTRIBUTES: [&str; 2] = ["uid", "sn"];
/// Object classes of a new user
const USER_CLASSES: [&str; 4] = ["top", "person", "organizationalPerson", "inetOrgPerson"];
/// Object classes of a new group
const GROUP_CLASSES: [&str; 2] = ["top", "groupOfNames"];

/// A single valued attribute value set.
fn single(value: &str) -> HashSet<String> {
	HashSet::from([value.to_owned()])
}

/// Check that a password can be stored.
fn validate_password<'a>(password: Option<&'a str>, field: &'static str) -> Result<&'a str, Error> {
	let password =
		password.filter(|password| !password.is_empty()).ok_or(Error::MissingField(field))?;
	if password.starts_with(' ') || password.ends_with(' ') {
		return Err(Error::InvalidPassword);
	}
	Ok(password)
}

/// Close `dir`, logging rather than returning a failure.
async fn close<D: Directory + ?Sized>(dir: &mut D) {
	if let Err(err) = dir.close().await {
		error!("Failed to close directory session: {err}");
	}
}

/// Manages the users and groups of the four subtrees.
#[derive(Debug)]
pub struct Registry<C = LdapConnector> {
	/// Subtree bases, limits and the privileged entries
	config: Arc<Config>,
	/// Opens a session per operation
	connector: C,
	/// Hashes new passwords
	hasher: Hasher,
	/// Held for the whole of every writing operation
	writes: Mutex<()>,
}

impl Registry<LdapConnector> {
	/// Create a registry talking to the LDAP server described by `config`.
	#[must_use]
	pub fn new(config: Config) -> Self {
		let config = Arc::new(config);
		let connector = LdapConnector::new(Arc::clone(&config));
		Self::with_connector(config, connector)
	}
}

impl<C: Connector> Registry<C> {
	/// Create a registry that opens its sessions through `connector`.
	#[must_use]
	pub fn with_connector(config: Arc<Config>, connector: C) -> Self {
		let hasher = Hasher::new(config.hashing.clone());
		Self { config, connector, hasher, writes: Mutex::new(()) }
	}

	/// The configuration in use.
	#[must_use]
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Fail if entries of `subtree` must not be changed here.
	fn check_writable(&self, subtree: Subtree) -> Result<(), Error> {
		if subtree.is_messaging() && self.config.messaging_managed_externally {
			return Err(Error::Forbidden(format!(
				"{subtree} are managed by an external directory"
			)));
		}
		Ok(())
	}

	/// Fail if `description` is too long to be stored.
	fn validate_description(&self, description: Option<&str>) -> Result<(), Error> {
		let max = self.config.limits.max_description_length;
		match description {
			Some(description) if description.chars().count() > max => {
				Err(Error::DescriptionTooLong { max })
			}
			_ => Ok(()),
		}
	}

	/// Find the entry `id` directly below the base of `subtree`.
	async fn find(
		&self,
		dir: &mut C::Directory,
		subtree: Subtree,
		id: &str,
	) -> Result<SearchEntry, Error> {
		dir.search(subtree.base(&self.config), NAMING_ATTRIBUTE, id)
			.await?
			.into_iter()
			.next()
			.ok_or_else(|| Error::NotFound(id.to_owned()))
	}

	/// Fail if `id` is already bound in `subtree`.
	async fn ensure_unbound(
		&self,
		dir: &mut C::Directory,
		subtree: Subtree,
		id: &str,
	) -> Result<(), Error> {
		if dir.search(subtree.base(&self.config), NAMING_ATTRIBUTE, id).await?.is_empty() {
			Ok(())
		} else {
			Err(Error::AlreadyExists(id.to_owned()))
		}
	}

	/// Work out the employee number of the webui user `id` after its
	/// memberships were reconciled, and the change needed to store it.
	async fn employee_number(
		&self,
		dir: &mut C::Directory,
		subtree: Subtree,
		id: &str,
		current: Option<u16>,
		reconciliation: &Reconciliation,
	) -> Result<(Option<u16>, Option<Mod<String>>), Error> {
		if subtree != Subtree::WebUiUsers {
			return Ok((None, None));
		}
		let group = &self.config.admin.system_group;
		let is_member = reconciliation.memberships.contains(group);
		match current {
			Some(number) if is_member && reconciliation.before.contains(group) => {
				Ok((Some(number), None))
			}
			_ if is_member => {
				let number = identity::assign_employee_number(dir, &self.config, id).await?;
				debug!(id, number, "Assigned employee number");
				let change =
					Mod::Replace(EMPLOYEE_NUMBER_ATTRIBUTE.to_owned(), single(&number.to_string()));
				Ok((Some(number), Some(change)))
			}
			Some(_) => {
				debug!(id, "Dropping employee number");
				Ok((None, Some(Mod::Replace(EMPLOYEE_NUMBER_ATTRIBUTE.to_owned(), HashSet::new()))))
			}
			None => Ok((None, None)),
		}
	}

	/// Create a user or group.
	///
	/// Groups that do not exist or reject the new member are reported in the
	/// returned entry's warning.
	#[instrument(skip_all, fields(subtree = %subtree, id = %entry.id))]
	pub async fn create(&self, subtree: Subtree, entry: NewEntry) -> Result<Entry, Error> {
		self.check_writable(subtree)?;
		subtree.validate_id(&entry.id, &self.config)?;
		self.validate_description(entry.description.as_deref())?;
		membership::check_self_membership(subtree, &entry.id, &entry.groups)?;
		let password = if subtree.is_group_subtree() {
			None
		} else {
			Some(validate_password(entry.password.as_deref(), "password")?)
		};

		let _guard = self.writes.lock().await;
		let mut dir = self.connector.connect().await?;
		let result = self.create_in(&mut dir, subtree, &entry, password).await;
		close(&mut dir).await;
		result
	}

	/// [`Self::create`] on an open session.
	async fn create_in(
		&self,
		dir: &mut C::Directory,
		subtree: Subtree,
		entry: &NewEntry,
		password: Option<&str>,
	) -> Result<Entry, Error> {
		let config = &*self.config;
		let id = entry.id.as_str();
		let dn = Dn::new(subtree.base(config), id);
		self.ensure_unbound(dir, subtree, id).await?;

		let description = entry.description.clone().filter(|description| !description.is_empty());
		let mut attrs: Attributes = vec![(NAMING_ATTRIBUTE.to_owned(), single(id))];
		if let Some(description) = &description {
			attrs.push((DESCRIPTION_ATTRIBUTE.to_owned(), single(description)));
		}
		match password {
			Some(password) => {
				let hash = self.hasher.hash(password).await?;
				attrs.push((
					OBJECT_CLASS_ATTRIBUTE.to_owned(),
					USER_CLASSES.iter().map(|class| (*class).to_owned()).collect(),
				));
				for attr in MIRROR_ATTRIBUTES {
					attrs.push((attr.to_owned(), single(id)));
				}
				attrs.push((PASSWORD_ATTRIBUTE.to_owned(), single(&hash)));
			}
			None => {
				attrs.push((
					OBJECT_CLASS_ATTRIBUTE.to_owned(),
					GROUP_CLASSES.iter().map(|class| (*class).to_owned()).collect(),
				));
				// Groups need at least one member
				attrs.push((MEMBER_ATTRIBUTE.to_owned(), single("")));
			}
		}
		dir.create_entry(dn.as_str(), attrs).await?;
		info!(path = %dn.composite(), "Created entry");

		let target = Target { subtree, id, origin: Origin::Created };
		let reconciliation =
			membership::reconcile(dir, config, &target, Some(&entry.groups)).await?;
		let (employee_number, change) =
			self.employee_number(dir, subtree, id, None, &reconciliation).await?;
		if let Some(change) = change {
			dir.modify_attributes(dn.as_str(), vec![change]).await?;
		}

		Ok(Entry {
			id: id.to_owned(),
			description,
			groups: reconciliation.memberships.into_iter().collect(),
			employee_number,
			warning: MembershipWarning::new(id, reconciliation.skipped),
		})
	}

	/// Change the entry currently named `lookup_id`.
	///
	/// A new id renames the entry and moves its memberships along. Removing
	/// the built-in administrator from the system administrators group is
	/// silently ignored.
	#[instrument(skip_all, fields(subtree = %subtree, id = lookup_id))]
	pub async fn modify(
		&self,
		subtree: Subtree,
		lookup_id: &str,
		changes: EntryChanges,
	) -> Result<Entry, Error> {
		self.check_writable(subtree)?;
		let id = changes.id.as_deref().unwrap_or(lookup_id);
		if id != lookup_id {
			if membership::is_immutable(&self.config, subtree, lookup_id) {
				return Err(Error::ImmutableEntry(lookup_id.to_owned()));
			}
			subtree.validate_id(id, &self.config)?;
		}
		self.validate_description(changes.description.as_deref())?;
		if let Some(groups) = &changes.groups {
			membership::check_self_membership(subtree, id, groups)?;
		}

		let _guard = self.writes.lock().await;
		let mut dir = self.connector.connect().await?;
		let result = self.modify_in(&mut dir, subtree, lookup_id, id, &changes).await;
		close(&mut dir).await;
		result
	}

	/// [`Self::modify`] on an open session.
	async fn modify_in(
		&self,
		dir: &mut C::Directory,
		subtree: Subtree,
		lookup_id: &str,
		id: &str,
		changes: &EntryChanges,
	) -> Result<Entry, Error> {
		let config = &*self.config;
		let base = subtree.base(config);
		let existing = self.find(dir, subtree, lookup_id).await?;
		let dn = Dn::new(base, id);
		let renamed = id != lookup_id;

		if renamed {
			self.ensure_unbound(dir, subtree, id).await?;
			let old = Dn::new(base, lookup_id);
			dir.rename(old.as_str(), &dn).await?;
			info!(from = %old.composite(), to = %dn.composite(), "Renamed entry");
		}

		let mut mods = Vec::new();
		if renamed && !subtree.is_group_subtree() {
			for attr in MIRROR_ATTRIBUTES {
				mods.push(Mod::Replace(attr.to_owned(), single(id)));
			}
		}
		let current = existing.attr_first(DESCRIPTION_ATTRIBUTE);
		let description = match changes.description.as_deref() {
			Some("") => {
				if current.is_some() {
					mods.push(Mod::Replace(DESCRIPTION_ATTRIBUTE.to_owned(), HashSet::new()));
				}
				None
			}
			Some(description) => {
				if current != Some(description) {
					mods.push(Mod::Replace(DESCRIPTION_ATTRIBUTE.to_owned(), single(description)));
				}
				Some(description.to_owned())
			}
			None => current.map(str::to_owned),
		};

		let origin = if renamed { Origin::Renamed { from: lookup_id } } else { Origin::Existing };
		let target = Target { subtree, id, origin };
		let reconciliation =
			membership::reconcile(dir, config, &target, changes.groups.as_deref()).await?;
		let current_number = existing.number_first(EMPLOYEE_NUMBER_ATTRIBUTE);
		let (employee_number, change) =
			self.employee_number(dir, subtree, id, current_number, &reconciliation).await?;
		mods.extend(change);

		if mods.is_empty() {
			debug!(path = %dn.composite(), "No attribute changes");
		} else {
			dir.modify_attributes(dn.as_str(), mods).await?;
		}
		info!(path = %dn.composite(), "Modified entry");

		Ok(Entry {
			id: id.to_owned(),
			description,
			groups: reconciliation.memberships.into_iter().collect(),
			employee_number,
			warning: MembershipWarning::new(id, reconciliation.skipped),
		})
	}

	/// Delete the entry `id` on behalf of the webui user `caller` and remove
	/// it from every group listing it.
	#[instrument(skip_all, fields(subtree = %subtree, id = id))]
	pub async fn delete(&self, subtree: Subtree, id: &str, caller: &str) -> Result<(), Error> {
		self.check_writable(subtree)?;
		if subtree.group_context() == Subtree::WebUiGroups && id == caller {
			return Err(Error::Forbidden(format!("{caller} cannot delete their own entry")));
		}

		let _guard = self.writes.lock().await;
		let mut dir = self.connector.connect().await?;
		let result = self.delete_in(&mut dir, subtree, id).await;
		close(&mut dir).await;
		result
	}

	/// [`Self::delete`] on an open session.
	async fn delete_in(
		&self,
		dir: &mut C::Directory,
		subtree: Subtree,
		id: &str,
	) -> Result<(), Error> {
		self.find(dir, subtree, id).await?;
		let dn = Dn::new(subtree.base(&self.config), id);
		dir.delete_entry(dn.as_str()).await?;
		info!(path = %dn.composite(), "Deleted entry");

		let skipped = membership::retire(dir, &self.config, subtree, id).await?;
		for group in skipped {
			warn!(
				path = %dn.composite(),
				"Group {} still lists deleted entry: {}",
				group.group,
				group.reason
			);
		}
		Ok(())
	}

	/// All entries of `subtree`. Entries that cannot be read are left out.
	#[instrument(skip_all, fields(subtree = %subtree))]
	pub async fn list(&self, subtree: Subtree) -> Result<Vec<Entry>, Error> {
		let mut dir = self.connector.connect().await?;
		let result = listing::load_entries(&mut dir, &self.config, subtree).await;
		close(&mut dir).await;
		result
	}

	/// The entry `id` of `subtree`.
	#[instrument(skip_all, fields(subtree = %subtree, id = id))]
	pub async fn get(&self, subtree: Subtree, id: &str) -> Result<Entry, Error> {
		let mut dir = self.connector.connect().await?;
		let result = match self.find(&mut dir, subtree, id).await {
			Ok(found) => listing::load_entry(&mut dir, &self.config, subtree, &found.dn).await,
			Err(err) => Err(err),
		};
		close(&mut dir).await;
		result
	}

	/// Replace the password of the user `id`.
	#[instrument(skip_all, fields(subtree = %subtree, id = id))]
	pub async fn reset_password(
		&self,
		subtree: Subtree,
		id: &str,
		password: &str,
	) -> Result<(), Error> {
		self.check_writable(subtree)?;
		if subtree.is_group_subtree() {
			return Err(Error::Forbidden(format!("{subtree} have no password")));
		}
		let password = validate_password(Some(password), "password")?;

		let _guard = self.writes.lock().await;
		let mut dir = self.connector.connect().await?;
		let result = match self.find(&mut dir, subtree, id).await {
			Ok(_) => self.store_password(&mut dir, subtree, id, password).await,
			Err(err) => Err(err),
		};
		close(&mut dir).await;
		result
	}

	/// Change the password of the webui user `id` after checking `old`.
	/// Users may only change their own password.
	#[instrument(skip_all, fields(id = id))]
	pub async fn change_password(
		&self,
		caller: &str,
		id: &str,
		old: &str,
		new: &str,
	) -> Result<(), Error> {
		if caller != id {
			return Err(Error::Forbidden(format!("{caller} cannot change the password of {id}")));
		}
		// The old password is checked by the directory as is
		if old.is_empty() {
			return Err(Error::MissingField("old password"));
		}
		let new = validate_password(Some(new), "password")?;
		let subtree = Subtree::WebUiUsers;

		let _guard = self.writes.lock().await;
		let mut dir = self.connector.connect().await?;
		let result = self.change_password_in(&mut dir, subtree, id, old, new).await;
		close(&mut dir).await;
		result
	}

	/// [`Self::change_password`] on an open session.
	async fn change_password_in(
		&self,
		dir: &mut C::Directory,
		subtree: Subtree,
		id: &str,
		old: &str,
		new: &str,
	) -> Result<(), Error> {
		let found = self.find(dir, subtree, id).await?;
		if !self.connector.verify_credentials(&found.dn, old).await? {
			return Err(Error::Forbidden(format!("current password of {id} does not match")));
		}
		self.store_password(dir, subtree, id, new).await
	}

	/// Hash `password` and store it for the user `id`.
	async fn store_password(
		&self,
		dir: &mut C::Directory,
		subtree: Subtree,
		id: &str,
		password: &str,
	) -> Result<(), Error> {
		let hash = self.hasher.hash(password).await?;
		let dn = Dn::new(subtree.base(&self.config), id);
		let change = Mod::Replace(PASSWORD_ATTRIBUTE.to_owned(), single(&hash));
		dir.modify_attributes(dn.as_str(), vec![change]).await?;
		info!(path = %dn.composite(), "Password replaced");
		Ok(())
	}
}
