//! Construction and escaping of distinguished names and membership match
//! values.
//!
//! An identifier ends up in the directory in two different shapes. As an
//! attribute value inside a DN it needs [`escape_value`]. When that DN is then
//! embedded in a composite path, [`escape_for_path`] must be applied on top of
//! the already escaped value. The two passes stay separate and always run in
//! that order.
//!
//! [`escape_for_reverse_match`] is unrelated to both: it produces the
//! hex-escaped form used to look up groups by their `member` values and is
//! never used to address an entry.
use std::fmt;

/// Attribute holding the short name of every managed entry.
pub const NAMING_ATTRIBUTE: &str = "cn";

/// Characters that are backslash-escaped anywhere in an attribute value.
const VALUE_SPECIALS: &[char] = &[',', '=', '+', '<', '>', '#', ';', '"', '\\'];

/// Characters replaced by their hex code in reverse membership match values.
const MATCH_SPECIALS: &[char] = &[',', '+', '"', '\\', '<', '>', ';', '#'];

/// Escape a raw value for use as an attribute value in a DN.
///
/// Separators and quoting characters are prefixed with a backslash, as are
/// leading and trailing spaces. NUL is written as `\00`.
#[must_use]
pub fn escape_value(raw: &str) -> String {
	let chars: Vec<char> = raw.chars().collect();
	let lead = chars.iter().take_while(|c| c.is_whitespace()).count();
	let trail = chars.len() - chars.iter().rev().take_while(|c| c.is_whitespace()).count();

	let mut escaped = String::with_capacity(raw.len() * 2);
	for (i, &c) in chars.iter().enumerate() {
		if c == '\0' {
			escaped.push_str("\\00");
			continue;
		}
		if i < lead || i >= trail || VALUE_SPECIALS.contains(&c) {
			escaped.push('\\');
		}
		escaped.push(c);
	}
	escaped
}

/// Escape an already [value-escaped](escape_value) string for embedding in a
/// composite path, where backslash, double quote and slash are separators.
#[must_use]
pub fn escape_for_path(escaped: &str) -> String {
	escaped.replace('\\', "\\\\").replace('"', "\\\"").replace('/', "\\/")
}

/// Replace structural characters of a raw value by their `\xx` hex code.
///
/// The result is only meant for matching `member` values and is not
/// guaranteed to round-trip.
#[must_use]
pub fn escape_for_reverse_match(raw: &str) -> String {
	if !raw.contains(MATCH_SPECIALS) {
		return raw.to_owned();
	}
	let mut escaped = String::with_capacity(raw.len() * 3);
	for c in raw.chars() {
		if MATCH_SPECIALS.contains(&c) {
			escaped.push_str(&format!("\\{:x}", u32::from(c)));
		} else {
			escaped.push(c);
		}
	}
	escaped
}

/// Join an escaped naming value with the base of its subtree.
#[must_use]
pub fn build_dn(base: &str, escaped: &str) -> String {
	format!("{NAMING_ATTRIBUTE}={escaped},{base}")
}

/// The `member` value to search for when looking up the groups of `raw` in
/// the subtree at `base`.
#[must_use]
pub fn reverse_match(base: &str, raw: &str) -> String {
	build_dn(base, &escape_for_reverse_match(raw))
}

/// The distinguished name of a managed entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dn {
	/// The value-escaped short name
	value: String,
	/// DN of the subtree holding the entry
	parent: String,
	/// The rendered DN
	full: String,
}

impl Dn {
	/// The DN of the entry named `raw` below `parent`.
	#[must_use]
	pub fn new(parent: &str, raw: &str) -> Self {
		let value = escape_value(raw);
		let full = build_dn(parent, &value);
		Self { value, parent: parent.to_owned(), full }
	}

	/// The rendered DN, as used on the wire and as a `member` value.
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.full
	}

	/// The relative name of the entry, e.g. `cn=alice`.
	#[must_use]
	pub fn rdn(&self) -> String {
		format!("{NAMING_ATTRIBUTE}={}", self.value)
	}

	/// The DN of the subtree holding the entry.
	#[must_use]
	pub fn parent(&self) -> &str {
		&self.parent
	}

	/// The DN with the path escaping pass applied on top of the value
	/// escaping.
	#[must_use]
	pub fn composite(&self) -> String {
		build_dn(&self.parent, &escape_for_path(&self.value))
	}
}

impl fmt::Display for Dn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.full)
	}
}
