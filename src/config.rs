//! Config for the directory registry.
use std::{
	io::BufReader,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use ldap3::LdapConnSettings;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Registry configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
	/// The URL to connect to the server with. Supports ldap, ldaps, and ldapi
	/// schemes
	pub url: Url,
	/// Connection settings.
	pub connection: ConnectionConfig,
	/// The DN to bind as when managing entries
	pub bind_dn: String,
	/// The password for the bind DN
	pub bind_password: String,
	/// Where users and groups are stored
	pub contexts: Contexts,
	/// External utilities used to hash passwords
	pub hashing: HashingConfig,
	/// Length limits for ids and descriptions
	pub limits: Limits,
	/// The privileged user and group
	pub admin: AdminConfig,
	/// The messaging namespace is owned by an external directory and must not
	/// be modified here
	pub messaging_managed_externally: bool,
}

impl Default for Config {
	#[allow(clippy::expect_used)]
	fn default() -> Self {
		Self {
			url: Url::parse("ldap://127.0.0.1:389").expect("static URL is valid"),
			connection: ConnectionConfig::default(),
			bind_dn: "cn=Directory Manager,dc=ism.ibm,dc=com".to_owned(),
			bind_password: String::new(),
			contexts: Contexts::default(),
			hashing: HashingConfig::default(),
			limits: Limits::default(),
			admin: AdminConfig::default(),
			messaging_managed_externally: false,
		}
	}
}

/// Base DNs of the four managed subtrees
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Contexts {
	/// Users of the web console
	pub webui_users: String,
	/// Groups of the web console
	pub webui_groups: String,
	/// Users of the messaging server
	pub messaging_users: String,
	/// Groups of the messaging server
	pub messaging_groups: String,
}

impl Default for Contexts {
	fn default() -> Self {
		Self {
			webui_users: "ou=people,ou=webui,dc=ism.ibm,dc=com".to_owned(),
			webui_groups: "ou=groups,ou=webui,dc=ism.ibm,dc=com".to_owned(),
			messaging_users: "ou=people,ou=messaging,dc=ism.ibm,dc=com".to_owned(),
			messaging_groups: "ou=groups,ou=messaging,dc=ism.ibm,dc=com".to_owned(),
		}
	}
}

/// Password hashing utilities, probed in order
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
	/// Preferred utility, called as `<path> -s <password> -n`
	pub primary: PathBuf,
	/// Fallback utility, called as `<path> -s <scheme> <password>`
	pub fallback: PathBuf,
	/// Hash scheme passed to the fallback utility
	pub fallback_scheme: String,
}

impl Default for HashingConfig {
	fn default() -> Self {
		Self {
			primary: PathBuf::from("/usr/sbin/slappasswd"),
			fallback: PathBuf::from("/usr/bin/pwdhash"),
			fallback_scheme: "SHA512".to_owned(),
		}
	}
}

/// Length limits, counted in characters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
	/// Maximum length of a webui user or group id
	pub max_id_length: usize,
	/// Maximum length of a messaging user or group id
	pub max_messaging_id_length: usize,
	/// Maximum length of a description
	pub max_description_length: usize,
}

impl Default for Limits {
	fn default() -> Self {
		Self { max_id_length: 100, max_messaging_id_length: 100, max_description_length: 256 }
	}
}

/// The built-in administrative user and the privileged group
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
	/// Id of the webui user that can neither be renamed nor leave the system
	/// administrators group
	pub user_id: String,
	/// Id of the webui group whose members carry an employee number
	pub system_group: String,
}

impl Default for AdminConfig {
	fn default() -> Self {
		Self { user_id: "admin".to_owned(), system_group: "SystemAdministrators".to_owned() }
	}
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// LDAP operation timeout.
	pub operation_timeout: Duration,

	/// TLS config
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self { timeout: 5, operation_timeout: Duration::from_secs(30), tls: TLSConfig::default() }
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) async fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = RootCertStore::empty();
			for der in read_pem(path, rustls_pemfile::certs).await? {
				roots
					.add(&Certificate(der))
					.map_err(|_| Error::Config("Could not read root certificate".to_owned()))?;
			}
			let builder =
				ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);

			let client_config =
				match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
					(Some(key_path), Some(cert_path)) => {
						let chain = read_pem(cert_path, rustls_pemfile::certs)
							.await?
							.into_iter()
							.map(Certificate)
							.collect();
						let key = read_pem(key_path, rustls_pemfile::pkcs8_private_keys)
							.await?
							.into_iter()
							.next()
							.ok_or_else(|| {
								Error::Config("Client key file contains no PKCS8 key".to_owned())
							})?;
						builder.with_client_auth_cert(chain, PrivateKey(key)).map_err(|_| {
							Error::Config("Could not read client certificates".to_owned())
						})?
					}
					(None, None) => builder.with_no_client_auth(),
					_ => Err(Error::Config(
						"Both a client certificate and key file in PKCS8 format must be specified"
							.to_owned(),
					))?,
				};
			settings = settings.set_config(Arc::new(client_config));
		}
		Ok(settings)
	}
}

/// Read a PEM file and extract its DER items with `parse`.
async fn read_pem(
	path: &Path,
	parse: fn(&mut dyn std::io::BufRead) -> std::io::Result<Vec<Vec<u8>>>,
) -> Result<Vec<Vec<u8>>, Error> {
	let contents = tokio::fs::read(path).await?;
	let items = parse(&mut BufReader::new(contents.as_slice()))
		.map_err(|_| Error::Config(format!("{} is not a valid PEM file", path.display())))?;
	if items.is_empty() {
		return Err(Error::Config(format!("{} contains no PEM items", path.display())));
	}
	Ok(items)
}
