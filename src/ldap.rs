//! [`Connector`] and [`Directory`] backed by an LDAP server

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapResult, Mod, Scope, SearchEntry};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
	config::Config,
	directory::{Attributes, Connector, Directory},
	dn::Dn,
	error::Error,
};

/// Result code of a failed bind
const INVALID_CREDENTIALS: u32 = 49;
/// Result code for operations on a DN that is not bound
const NO_SUCH_OBJECT: u32 = 32;
/// Result code for adding or renaming onto a DN that is already bound
const ENTRY_ALREADY_EXISTS: u32 = 68;

/// Opens [`LdapDirectory`] sessions using the URL, connection settings and
/// service credentials of a [`Config`].
#[derive(Debug, Clone)]
pub struct LdapConnector {
	/// The configuration of the LDAP client.
	config: Arc<Config>,
}

impl LdapConnector {
	/// Create a new [`LdapConnector`] with the given configuration.
	#[must_use]
	pub fn new(config: Arc<Config>) -> Self {
		Self { config }
	}

	/// Create a connection to an ldap server based on the settings and url
	/// specified in the configuration. The bind result is returned alongside
	/// so callers can tell rejected credentials apart from other failures.
	async fn open(
		&self,
		bind_dn: &str,
		password: &str,
	) -> Result<(LdapDirectory, LdapResult), Error> {
		let settings = self.config.connection.to_settings().await?;
		let (conn, ldap) =
			LdapConnAsync::from_url_with_settings(settings, &self.config.url).await?;
		let driver = tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("Ldap connection error {err}");
			}
		});

		let mut directory =
			LdapDirectory { ldap, driver, timeout: self.config.connection.operation_timeout };
		debug!(bind_dn, "Binding to directory");
		let result = directory.ldap.simple_bind(bind_dn, password).await?;
		Ok((directory, result))
	}
}

#[async_trait]
impl Connector for LdapConnector {
	type Directory = LdapDirectory;

	async fn connect(&self) -> Result<LdapDirectory, Error> {
		let (directory, result) =
			self.open(&self.config.bind_dn, &self.config.bind_password).await?;
		result.success()?;
		Ok(directory)
	}

	async fn verify_credentials(&self, dn: &str, password: &str) -> Result<bool, Error> {
		// An empty password would be an unauthenticated bind and always succeed
		if password.is_empty() {
			return Ok(false);
		}
		let (mut directory, result) = self.open(dn, password).await?;
		if let Err(err) = directory.close().await {
			warn!("Failed to unbind after verifying credentials: {err}");
		}
		match result.rc {
			INVALID_CREDENTIALS => Ok(false),
			_ => result.success().map(|_| true).map_err(Error::from),
		}
	}
}

/// An authenticated LDAP session. The connection driver is stopped when the
/// session is dropped.
#[derive(Debug)]
pub struct LdapDirectory {
	/// Handle for issuing operations
	ldap: ldap3::Ldap,
	/// Background task driving the connection
	driver: JoinHandle<()>,
	/// Timeout applied to every operation
	timeout: Duration,
}

impl LdapDirectory {
	/// Run a search and collect the entries.
	async fn search_entries(
		&mut self,
		base: &str,
		scope: Scope,
		filter: &str,
		attrs: Vec<&str>,
	) -> Result<Vec<SearchEntry>, Error> {
		debug!(base, filter, "Searching directory");
		let result = self.ldap.with_timeout(self.timeout).search(base, scope, filter, attrs).await?;
		if result.1.rc == NO_SUCH_OBJECT {
			return Err(Error::NotFound(base.to_owned()));
		}
		let (entries, _res) = result.success()?;
		Ok(entries.into_iter().map(SearchEntry::construct).collect())
	}
}

/// Translate the result codes callers care about into [`Error`]s.
fn check(result: LdapResult, dn: &str) -> Result<(), Error> {
	match result.rc {
		NO_SUCH_OBJECT => Err(Error::NotFound(dn.to_owned())),
		ENTRY_ALREADY_EXISTS => Err(Error::AlreadyExists(dn.to_owned())),
		_ => {
			result.success()?;
			Ok(())
		}
	}
}

#[async_trait]
impl Directory for LdapDirectory {
	async fn search(
		&mut self,
		base: &str,
		attr: &str,
		value: &str,
	) -> Result<Vec<SearchEntry>, Error> {
		let filter = format!("({attr}={})", ldap3::ldap_escape(value));
		self.search_entries(base, Scope::OneLevel, &filter, vec!["*"]).await
	}

	async fn list_children(&mut self, base: &str) -> Result<Vec<String>, Error> {
		// "1.1" requests no attributes, only the DNs are of interest
		let entries =
			self.search_entries(base, Scope::OneLevel, "(objectClass=*)", vec!["1.1"]).await?;
		Ok(entries.into_iter().map(|entry| entry.dn).collect())
	}

	async fn get_attributes(&mut self, dn: &str) -> Result<SearchEntry, Error> {
		self.search_entries(dn, Scope::Base, "(objectClass=*)", vec!["*"])
			.await?
			.into_iter()
			.next()
			.ok_or_else(|| Error::NotFound(dn.to_owned()))
	}

	async fn create_entry(&mut self, dn: &str, attrs: Attributes) -> Result<(), Error> {
		debug!(dn, "Adding directory entry");
		let result = self.ldap.with_timeout(self.timeout).add(dn, attrs).await?;
		check(result, dn)
	}

	async fn modify_attributes(&mut self, dn: &str, mods: Vec<Mod<String>>) -> Result<(), Error> {
		debug!(dn, count = mods.len(), "Modifying directory entry");
		let result = self.ldap.with_timeout(self.timeout).modify(dn, mods).await?;
		check(result, dn)
	}

	async fn rename(&mut self, old: &str, new: &Dn) -> Result<(), Error> {
		debug!(old, new = %new, "Renaming directory entry");
		let rdn = new.rdn();
		let result = self
			.ldap
			.with_timeout(self.timeout)
			.modifydn(old, &rdn, true, Some(new.parent()))
			.await?;
		match result.rc {
			ENTRY_ALREADY_EXISTS => Err(Error::AlreadyExists(new.to_string())),
			_ => check(result, old),
		}
	}

	async fn delete_entry(&mut self, dn: &str) -> Result<(), Error> {
		debug!(dn, "Deleting directory entry");
		let result = self.ldap.with_timeout(self.timeout).delete(dn).await?;
		check(result, dn)
	}

	async fn close(&mut self) -> Result<(), Error> {
		self.ldap.unbind().await?;
		Ok(())
	}
}

impl Drop for LdapDirectory {
	fn drop(&mut self) {
		self.driver.abort();
	}
}
