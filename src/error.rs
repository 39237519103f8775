//! Error codes

/// Errors that can occur when managing directory entries
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// The identifier is empty, blank, padded with spaces or too long.
	#[error("Invalid identifier: {0}")]
	InvalidIdentifier(String),
	/// A required field was missing or empty.
	#[error("Missing required field `{0}`")]
	MissingField(&'static str),
	/// The password starts or ends with a space.
	#[error("Passwords must not start or end with a space")]
	InvalidPassword,
	/// The description is longer than the configured maximum.
	#[error("Description exceeds {max} characters")]
	DescriptionTooLong {
		/// The configured maximum length
		max: usize,
	},
	/// An entry with this id is already bound in the subtree.
	#[error("Entry `{0}` already exists")]
	AlreadyExists(String),
	/// The entry does not exist in the subtree.
	#[error("Entry `{0}` not found")]
	NotFound(String),
	/// The built-in administrative entry cannot be renamed.
	#[error("Entry `{0}` cannot be modified this way")]
	ImmutableEntry(String),
	/// A group was asked to become a member of itself.
	#[error("Group `{0}` cannot be a member of itself")]
	SelfMembershipNotAllowed(String),
	/// The operation is not permitted for the caller or namespace.
	#[error("Forbidden: {0}")]
	Forbidden(String),
	/// Neither of the configured hashing utilities can be executed.
	#[error("No password hashing utility is available")]
	HashingUnavailable,
	/// The hashing utility ran but did not produce a hash.
	#[error("Password hashing failed: {0}")]
	HashingFailed(String),
	/// A directory entry lacks data every managed entry has.
	#[error("Malformed entry: {0}")]
	Malformed(String),
	/// Every employee number in the permitted range is already assigned.
	#[error("No unassigned employee number left")]
	EmployeeNumbersExhausted,
	/// The configuration is unusable.
	#[error("Invalid configuration: {0}")]
	Config(String),
	/// Reading configuration material from disk failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// The directory could not be reached, refused the credentials, or failed
	/// an operation.
	#[error("Directory unavailable: {0}")]
	DirectoryUnavailable(#[from] ldap3::LdapError),
}

impl Error {
	/// Whether this error was raised while validating input, before the
	/// directory was touched.
	#[must_use]
	pub const fn is_validation(&self) -> bool {
		matches!(
			self,
			Self::InvalidIdentifier(_)
				| Self::MissingField(_)
				| Self::InvalidPassword
				| Self::DescriptionTooLong { .. }
				| Self::AlreadyExists(_)
				| Self::ImmutableEntry(_)
				| Self::SelfMembershipNotAllowed(_)
				| Self::Forbidden(_)
		)
	}
}
