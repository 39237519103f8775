//! The operations the registry needs from a directory server.
//!
//! [`Connector`] opens one authenticated [`Directory`] session per registry
//! operation. Sessions are owned by the operation that opened them and must be
//! [closed](Directory::close) on every exit path. Nothing in here retries:
//! that is left to the caller.
use std::collections::HashSet;

use async_trait::async_trait;
pub use ldap3::{Mod, SearchEntry};

use crate::{dn::Dn, error::Error};

/// Attributes of a new entry, as name and set of values.
pub type Attributes = Vec<(String, HashSet<String>)>;

/// An open, authenticated session with a directory server.
#[async_trait]
pub trait Directory: Send {
	/// Entries directly below `base` whose attribute `attr` equals `value`.
	async fn search(
		&mut self,
		base: &str,
		attr: &str,
		value: &str,
	) -> Result<Vec<SearchEntry>, Error>;

	/// The DNs of all entries directly below `base`.
	async fn list_children(&mut self, base: &str) -> Result<Vec<String>, Error>;

	/// All user attributes of the entry at `dn`. Fails with
	/// [`Error::NotFound`] if there is no such entry.
	async fn get_attributes(&mut self, dn: &str) -> Result<SearchEntry, Error>;

	/// Add a new entry. Fails with [`Error::AlreadyExists`] if `dn` is bound.
	async fn create_entry(&mut self, dn: &str, attrs: Attributes) -> Result<(), Error>;

	/// Apply `mods` to the entry at `dn` in one operation.
	async fn modify_attributes(&mut self, dn: &str, mods: Vec<Mod<String>>) -> Result<(), Error>;

	/// Move the entry at `old` to `new`. Fails with [`Error::AlreadyExists`]
	/// if `new` is bound.
	async fn rename(&mut self, old: &str, new: &Dn) -> Result<(), Error>;

	/// Remove the entry at `dn`.
	async fn delete_entry(&mut self, dn: &str) -> Result<(), Error>;

	/// End the session.
	async fn close(&mut self) -> Result<(), Error>;
}

/// Opens sessions with a directory server.
#[async_trait]
pub trait Connector: Send + Sync {
	/// The session type
	type Directory: Directory;

	/// Open a session bound with the configured service credentials. Fails
	/// with [`Error::DirectoryUnavailable`] if the server cannot be reached or
	/// rejects the credentials.
	async fn connect(&self) -> Result<Self::Directory, Error>;

	/// Whether `password` is accepted for a simple bind as `dn`.
	async fn verify_credentials(&self, dn: &str, password: &str) -> Result<bool, Error>;
}
