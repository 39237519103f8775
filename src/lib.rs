//! Manage users and groups in an LDAP directory.
//!
//! Entries live in four fixed subtrees: users and groups of the web console,
//! and users and groups of the messaging server. A group lists its members in
//! its `member` attribute; which groups an entry belongs to is never stored on
//! the entry itself. Callers hand the [`Registry`] the groups an entry should
//! belong to and it works out the membership changes by searching for the
//! groups currently listing the entry, so the directory stays the single source
//! of truth even when it is edited by other tools.
//!
//! Renames move every membership over to the new DN, deletions strip the
//! entry from all of its groups. Members of the system administrators group
//! carry a unique employee number, and the built-in administrator can neither
//! be renamed nor leave that group.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use url::Url;
//! use ldap_registry::{Config, NewEntry, Registry, Subtree};
//!
//! // Configuration can also be deserialized with serde. It's hand-constructed
//! // here for demonstration purposes.
//! let config = Config {
//!     url: Url::parse("ldap://localhost")?,
//!     bind_dn: "cn=admin,dc=example,dc=com".to_owned(),
//!     bind_password: "verysecret".to_owned(),
//!     ..Config::default()
//! };
//!
//! let registry = Registry::new(config);
//! let alice = registry
//!     .create(
//!         Subtree::WebUiUsers,
//!         NewEntry {
//!             id: "alice".to_owned(),
//!             password: Some("p@ss1".to_owned()),
//!             groups: vec!["Operators".to_owned()],
//!             ..NewEntry::default()
//!         },
//!     )
//!     .await?;
//! if let Some(warning) = &alice.warning {
//!     println!("{}", warning.message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Only one registry should write to a directory at a time. Writes are
//!   serialized within a [`Registry`], not across processes.
//! * Nested groups are not resolved: a group's members are reported as they
//!   are listed.
//! * Failed operations are not rolled back. A rename that succeeded stays in
//!   place even if a later step of the same modification fails.

pub mod config;
pub mod directory;
pub mod dn;
pub mod entry;
pub mod error;
pub mod hasher;
pub mod identity;
pub mod ldap;
pub mod listing;
pub mod membership;
pub mod model;
pub mod registry;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	config::{Config, ConnectionConfig},
	directory::{Connector, Directory},
	entry::SearchEntryExt,
	error::Error,
	ldap::LdapConnector,
	model::{Entry, EntryChanges, MembershipWarning, NewEntry, SkipReason, SkippedGroup, Subtree},
	registry::Registry,
};
