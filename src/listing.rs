//! Reading managed entries back from the directory.
use tracing::warn;

use crate::{
	config::Config,
	directory::Directory,
	dn::NAMING_ATTRIBUTE,
	entry::SearchEntryExt,
	error::Error,
	membership,
	model::{Entry, Subtree},
};

/// Attribute holding the free text description of an entry
pub const DESCRIPTION_ATTRIBUTE: &str = "description";
/// Attribute holding the number of a system administrator
pub const EMPLOYEE_NUMBER_ATTRIBUTE: &str = "employeeNumber";

/// Read the entry at `dn` of `subtree` together with its groups.
pub async fn load_entry<D: Directory + ?Sized>(
	dir: &mut D,
	config: &Config,
	subtree: Subtree,
	dn: &str,
) -> Result<Entry, Error> {
	let attrs = dir.get_attributes(dn).await?;
	let id = attrs
		.attr_first(NAMING_ATTRIBUTE)
		.ok_or_else(|| Error::Malformed(format!("{dn} has no {NAMING_ATTRIBUTE}")))?
		.to_owned();
	let description = attrs.attr_first(DESCRIPTION_ATTRIBUTE).map(str::to_owned);
	let employee_number = if subtree.is_group_subtree() {
		None
	} else {
		attrs.number_first(EMPLOYEE_NUMBER_ATTRIBUTE)
	};
	let groups = membership::groups_of(dir, config, subtree, &id).await?;

	Ok(Entry {
		id,
		description,
		groups: groups.into_iter().collect(),
		employee_number,
		warning: None,
	})
}

/// Read all entries directly below the base of `subtree`. Entries that cannot
/// be read are logged and left out.
pub async fn load_entries<D: Directory + ?Sized>(
	dir: &mut D,
	config: &Config,
	subtree: Subtree,
) -> Result<Vec<Entry>, Error> {
	let children = dir.list_children(subtree.base(config)).await?;
	let mut entries = Vec::with_capacity(children.len());
	for dn in children {
		match load_entry(dir, config, subtree, &dn).await {
			Ok(entry) => entries.push(entry),
			Err(err) => warn!(dn = %dn, "Leaving entry out of {subtree} listing: {err}"),
		}
	}
	Ok(entries)
}
