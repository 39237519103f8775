#![allow(dead_code)]

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	error::Error,
	os::unix::fs::PermissionsExt,
	sync::{Arc, Mutex},
};

use async_trait::async_trait;
use ldap3::{LdapConnAsync, Mod, SearchEntry};
use ldap_registry::{
	config::Config,
	directory::{Attributes, Connector, Directory},
	dn::Dn,
	Registry, Subtree,
};
use tempfile::TempDir;

/// A DN as a list of (lowercased attribute type, unescaped value) pairs
type Key = Vec<(String, String)>;

/// Turn `\xx` hex pairs and `\c` escapes back into plain characters.
fn unescape(value: &str) -> String {
	let bytes = value.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'\\' && i + 1 < bytes.len() {
			let hex = bytes.get(i + 1..i + 3).and_then(|pair| std::str::from_utf8(pair).ok());
			match hex.and_then(|pair| u8::from_str_radix(pair, 16).ok()) {
				Some(byte) => {
					out.push(byte);
					i += 3;
				}
				None => {
					out.push(bytes[i + 1]);
					i += 2;
				}
			}
		} else {
			out.push(bytes[i]);
			i += 1;
		}
	}
	String::from_utf8_lossy(&out).into_owned()
}

/// Split `s` at every `sep` that is not escaped with a backslash.
fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
	let mut parts = Vec::new();
	let mut start = 0;
	let mut escaped = false;
	for (i, c) in s.char_indices() {
		if escaped {
			escaped = false;
		} else if c == '\\' {
			escaped = true;
		} else if c == sep {
			parts.push(&s[start..i]);
			start = i + 1;
		}
	}
	parts.push(&s[start..]);
	parts
}

/// Normalize a DN the way a directory server compares them.
pub fn key(dn: &str) -> Key {
	if dn.is_empty() {
		return Vec::new();
	}
	split_unescaped(dn, ',')
		.into_iter()
		.map(|rdn| {
			let (attr, value) = rdn.split_once('=').unwrap_or((rdn, ""));
			(attr.trim().to_lowercase(), unescape(value.trim()))
		})
		.collect()
}

/// Whether `attr` holds DNs.
fn is_dn_attribute(attr: &str) -> bool {
	attr.eq_ignore_ascii_case("member")
}

/// Compare two values of `attr`.
fn same_value(attr: &str, a: &str, b: &str) -> bool {
	if is_dn_attribute(attr) {
		key(a) == key(b)
	} else {
		a == b
	}
}

/// An entry of the in-memory directory.
#[derive(Debug, Clone)]
pub struct Stored {
	pub dn: String,
	pub attrs: HashMap<String, Vec<String>>,
}

impl Stored {
	/// The values of `attr`, looked up regardless of case.
	pub fn values(&self, attr: &str) -> Vec<String> {
		self.attrs
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(attr))
			.map(|(_, values)| values.clone())
			.unwrap_or_default()
	}

	fn values_mut(&mut self, attr: &str) -> Option<&mut Vec<String>> {
		self.attrs.iter_mut().find(|(name, _)| name.eq_ignore_ascii_case(attr)).map(|(_, v)| v)
	}

	fn remove(&mut self, attr: &str) {
		self.attrs.retain(|name, _| !name.eq_ignore_ascii_case(attr));
	}
}

/// Contents of the in-memory directory plus counters for assertions.
#[derive(Debug, Default)]
pub struct State {
	pub entries: BTreeMap<Key, Stored>,
	/// Create, modify, rename and delete calls, successful or not
	pub writes: usize,
	pub connects: usize,
	pub closes: usize,
	/// The server cannot be reached
	pub unavailable: bool,
	/// DNs whose modification is rejected
	pub fail_modify: Vec<Key>,
}

impl State {
	pub fn insert(&mut self, dn: &str, attrs: &[(&str, &[&str])]) {
		let attrs = attrs
			.iter()
			.map(|(name, values)| {
				((*name).to_owned(), values.iter().map(|value| (*value).to_owned()).collect())
			})
			.collect();
		self.entries.insert(key(dn), Stored { dn: dn.to_owned(), attrs });
	}

	pub fn get(&self, dn: &str) -> Option<&Stored> {
		self.entries.get(&key(dn))
	}

	/// Values of `attr` on the entry at `dn`, empty if either is missing.
	pub fn values(&self, dn: &str, attr: &str) -> Vec<String> {
		self.get(dn).map(|entry| entry.values(attr)).unwrap_or_default()
	}

	pub fn has_member(&self, group_dn: &str, member_dn: &str) -> bool {
		self.values(group_dn, "member").iter().any(|value| key(value) == key(member_dn))
	}

	fn children(&self, base: &Key) -> impl Iterator<Item = &Stored> + '_ {
		let base = base.clone();
		self.entries
			.iter()
			.filter(move |(k, _)| k.len() == base.len() + 1 && k[1..] == base[..])
			.map(|(_, entry)| entry)
	}

	fn apply(&mut self, dn: &str, mods: Vec<Mod<String>>) -> Result<(), ldap_registry::Error> {
		let k = key(dn);
		if self.fail_modify.contains(&k) {
			return Err(ldap_registry::Error::Forbidden(format!("unwilling to perform on {dn}")));
		}
		let mut entry = self
			.entries
			.get(&k)
			.cloned()
			.ok_or_else(|| ldap_registry::Error::NotFound(dn.to_owned()))?;
		for change in mods {
			match change {
				Mod::Add(attr, values) => {
					let mut current = entry.values(&attr);
					for value in values {
						if current.iter().any(|v| same_value(&attr, v, &value)) {
							return Err(ldap_registry::Error::AlreadyExists(value));
						}
						current.push(value);
					}
					entry.remove(&attr);
					entry.attrs.insert(attr, current);
				}
				Mod::Delete(attr, values) => {
					let Some(current) = entry.values_mut(&attr) else {
						return Err(ldap_registry::Error::NotFound(attr));
					};
					for value in values {
						let position = current.iter().position(|v| same_value(&attr, v, &value));
						match position {
							Some(position) => {
								current.remove(position);
							}
							None => return Err(ldap_registry::Error::NotFound(value)),
						}
					}
					if current.is_empty() {
						entry.remove(&attr);
					}
				}
				Mod::Replace(attr, values) => {
					entry.remove(&attr);
					if !values.is_empty() {
						entry.attrs.insert(attr, values.into_iter().collect());
					}
				}
				Mod::Increment(attr, _) => {
					return Err(ldap_registry::Error::Forbidden(format!("cannot increment {attr}")));
				}
			}
		}
		self.entries.insert(k, entry);
		Ok(())
	}
}

fn search_entry(stored: &Stored) -> SearchEntry {
	SearchEntry { dn: stored.dn.clone(), attrs: stored.attrs.clone(), bin_attrs: HashMap::new() }
}

/// Opens sessions on a shared in-memory directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
	pub state: Arc<Mutex<State>>,
}

/// A session on the in-memory directory.
#[derive(Debug)]
pub struct MemoryDirectory {
	state: Arc<Mutex<State>>,
}

#[async_trait]
impl Connector for MemoryConnector {
	type Directory = MemoryDirectory;

	async fn connect(&self) -> Result<MemoryDirectory, ldap_registry::Error> {
		let mut state = self.state.lock().unwrap();
		state.connects += 1;
		if state.unavailable {
			let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "directory down");
			return Err(ldap3::LdapError::from(err).into());
		}
		Ok(MemoryDirectory { state: Arc::clone(&self.state) })
	}

	async fn verify_credentials(
		&self,
		dn: &str,
		password: &str,
	) -> Result<bool, ldap_registry::Error> {
		let state = self.state.lock().unwrap();
		let expected = format!("{{TEST}}{password}");
		Ok(!password.is_empty() && state.values(dn, "userPassword").contains(&expected))
	}
}

#[async_trait]
impl Directory for MemoryDirectory {
	async fn search(
		&mut self,
		base: &str,
		attr: &str,
		value: &str,
	) -> Result<Vec<SearchEntry>, ldap_registry::Error> {
		let state = self.state.lock().unwrap();
		let base = key(base);
		if !state.entries.contains_key(&base) {
			return Err(ldap_registry::Error::NotFound(format!("{base:?}")));
		}
		Ok(state
			.children(&base)
			.filter(|entry| entry.values(attr).iter().any(|v| same_value(attr, v, value)))
			.map(search_entry)
			.collect())
	}

	async fn list_children(&mut self, base: &str) -> Result<Vec<String>, ldap_registry::Error> {
		let state = self.state.lock().unwrap();
		let base = key(base);
		if !state.entries.contains_key(&base) {
			return Err(ldap_registry::Error::NotFound(format!("{base:?}")));
		}
		Ok(state.children(&base).map(|entry| entry.dn.clone()).collect())
	}

	async fn get_attributes(&mut self, dn: &str) -> Result<SearchEntry, ldap_registry::Error> {
		let state = self.state.lock().unwrap();
		state.get(dn).map(search_entry).ok_or_else(|| ldap_registry::Error::NotFound(dn.to_owned()))
	}

	async fn create_entry(
		&mut self,
		dn: &str,
		attrs: Attributes,
	) -> Result<(), ldap_registry::Error> {
		let mut state = self.state.lock().unwrap();
		state.writes += 1;
		let k = key(dn);
		if state.entries.contains_key(&k) {
			return Err(ldap_registry::Error::AlreadyExists(dn.to_owned()));
		}
		let attrs =
			attrs.into_iter().map(|(name, values)| (name, values.into_iter().collect())).collect();
		state.entries.insert(k, Stored { dn: dn.to_owned(), attrs });
		Ok(())
	}

	async fn modify_attributes(
		&mut self,
		dn: &str,
		mods: Vec<Mod<String>>,
	) -> Result<(), ldap_registry::Error> {
		let mut state = self.state.lock().unwrap();
		state.writes += 1;
		state.apply(dn, mods)
	}

	async fn rename(&mut self, old: &str, new: &Dn) -> Result<(), ldap_registry::Error> {
		let mut state = self.state.lock().unwrap();
		state.writes += 1;
		let new_key = key(new.as_str());
		if state.entries.contains_key(&new_key) {
			return Err(ldap_registry::Error::AlreadyExists(new.to_string()));
		}
		let mut entry = state
			.entries
			.remove(&key(old))
			.ok_or_else(|| ldap_registry::Error::NotFound(old.to_owned()))?;
		entry.dn = new.to_string();
		entry.remove("cn");
		entry.attrs.insert("cn".to_owned(), vec![new_key[0].1.clone()]);
		state.entries.insert(new_key, entry);
		Ok(())
	}

	async fn delete_entry(&mut self, dn: &str) -> Result<(), ldap_registry::Error> {
		let mut state = self.state.lock().unwrap();
		state.writes += 1;
		state
			.entries
			.remove(&key(dn))
			.map(|_| ())
			.ok_or_else(|| ldap_registry::Error::NotFound(dn.to_owned()))
	}

	async fn close(&mut self) -> Result<(), ldap_registry::Error> {
		self.state.lock().unwrap().closes += 1;
		Ok(())
	}
}

/// A registry over an in-memory directory holding the four subtrees, the
/// `SystemAdministrators` and `Operators` groups and the `admin` user.
pub struct Fixture {
	pub registry: Registry<MemoryConnector>,
	pub state: Arc<Mutex<State>>,
	pub config: Arc<Config>,
	_scratch: TempDir,
}

impl Fixture {
	pub fn new() -> Self {
		Self::with_config(|_| {})
	}

	pub fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
		let scratch = tempfile::tempdir().unwrap();
		// Stands in for slappasswd, which is called as `-s <password> -n`
		let hasher = scratch.path().join("hasher");
		std::fs::write(&hasher, "#!/bin/sh\nprintf '{TEST}%s\\n' \"$2\"\n").unwrap();
		std::fs::set_permissions(&hasher, std::fs::Permissions::from_mode(0o755)).unwrap();

		let mut config = Config::default();
		config.hashing.primary = hasher;
		config.hashing.fallback = scratch.path().join("missing");
		customize(&mut config);
		let config = Arc::new(config);

		let connector = MemoryConnector::default();
		let state = Arc::clone(&connector.state);
		{
			let mut state = state.lock().unwrap();
			state.insert("dc=ism.ibm,dc=com", &[("objectClass", &["domain"])]);
			state.insert("ou=webui,dc=ism.ibm,dc=com", &[("objectClass", &["organizationalUnit"])]);
			state.insert(
				"ou=messaging,dc=ism.ibm,dc=com",
				&[("objectClass", &["organizationalUnit"])],
			);
			for subtree in Subtree::ALL {
				state.insert(subtree.base(&config), &[("objectClass", &["organizationalUnit"])]);
			}
			let admin = Dn::new(Subtree::WebUiUsers.base(&config), "admin");
			state.insert(
				admin.as_str(),
				&[
					("objectClass", &["inetOrgPerson"]),
					("cn", &["admin"]),
					("uid", &["admin"]),
					("sn", &["admin"]),
					("employeeNumber", &["1"]),
					("userPassword", &["{TEST}admin"]),
				],
			);
			let groups = Subtree::WebUiGroups.base(&config);
			state.insert(
				Dn::new(groups, "SystemAdministrators").as_str(),
				&[
					("objectClass", &["groupOfNames"]),
					("cn", &["SystemAdministrators"]),
					("member", &["", admin.as_str()]),
				],
			);
			state.insert(
				Dn::new(groups, "Operators").as_str(),
				&[("objectClass", &["groupOfNames"]), ("cn", &["Operators"]), ("member", &[""])],
			);
			state.insert(
				Dn::new(Subtree::MessagingGroups.base(&config), "Publishers").as_str(),
				&[("objectClass", &["groupOfNames"]), ("cn", &["Publishers"]), ("member", &[""])],
			);
		}

		let registry = Registry::with_connector(Arc::clone(&config), connector);
		Self { registry, state, config, _scratch: scratch }
	}

	pub fn dn(&self, subtree: Subtree, id: &str) -> String {
		Dn::new(subtree.base(&self.config), id).to_string()
	}

	/// Whether the group `group` of `subtree`'s group context lists `id`.
	pub fn is_member(&self, subtree: Subtree, id: &str, group: &str) -> bool {
		let group_dn = self.dn(subtree.group_context(), group);
		self.state.lock().unwrap().has_member(&group_dn, &self.dn(subtree, id))
	}

	pub fn values(&self, subtree: Subtree, id: &str, attr: &str) -> Vec<String> {
		self.state.lock().unwrap().values(&self.dn(subtree, id), attr)
	}

	pub fn exists(&self, subtree: Subtree, id: &str) -> bool {
		self.state.lock().unwrap().get(&self.dn(subtree, id)).is_some()
	}

	pub fn writes(&self) -> usize {
		self.state.lock().unwrap().writes
	}
}

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

// Helpers for the live directory used by the docker tests

pub const LIVE_URL: &str = "ldap://localhost:1389";
pub const LIVE_BASE: &str = "dc=example,dc=org";
pub const LIVE_ADMIN: &str = "cn=admin,dc=example,dc=org";
pub const LIVE_PASSWORD: &str = "adminpassword";

pub async fn ldap_connect() -> Result<ldap3::Ldap, Box<dyn Error>> {
	let (conn, mut ldap) = LdapConnAsync::new(LIVE_URL).await?;
	let _handle = tokio::spawn(async move {
		if let Err(err) = conn.drive().await {
			panic!("Ldap connection error {err}");
		}
	});
	ldap.simple_bind(LIVE_ADMIN, LIVE_PASSWORD).await?;
	Ok(ldap)
}

pub async fn ldap_add_organizational_unit(
	ldap: &mut ldap3::Ldap,
	dn: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(dn, vec![("objectClass", ["organizationalUnit"].into())]).await?.success()?;
	Ok(())
}

/// Delete `dn` and everything below it, ignoring entries that are gone.
pub async fn ldap_delete_tree(ldap: &mut ldap3::Ldap, dn: &str) -> Result<(), Box<dyn Error>> {
	let search = ldap.search(dn, ldap3::Scope::Subtree, "(objectClass=*)", vec!["1.1"]).await?;
	let Ok((entries, _res)) = search.success() else {
		return Ok(());
	};
	let mut dns: Vec<String> =
		entries.into_iter().map(|entry| SearchEntry::construct(entry).dn).collect();
	// Children before their parents
	dns.sort_by_key(|dn| std::cmp::Reverse(dn.len()));
	for dn in dns {
		ldap.delete(&dn).await?.success()?;
	}
	Ok(())
}

pub async fn ldap_add_group(
	ldap: &mut ldap3::Ldap,
	dn: &str,
	cn: &str,
	members: &[&str],
) -> Result<(), Box<dyn Error>> {
	let members: HashSet<&str> = members.iter().copied().chain([""]).collect();
	ldap.add(
		dn,
		vec![("objectClass", ["groupOfNames"].into()), ("cn", [cn].into()), ("member", members)],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_add_user(
	ldap: &mut ldap3::Ldap,
	dn: &str,
	cn: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		dn,
		vec![("objectClass", ["inetOrgPerson"].into()), ("cn", [cn].into()), ("sn", [cn].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_search(ldap: &mut ldap3::Ldap, dn: &str) -> Result<SearchEntry, Box<dyn Error>> {
	let (result, _res) =
		ldap.search(dn, ldap3::Scope::Base, "(objectClass=*)", vec!["*"]).await?.success()?;
	let entry = result.first().ok_or("No entry found")?.clone();
	Ok(SearchEntry::construct(entry))
}
