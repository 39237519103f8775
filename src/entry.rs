//! Helper methods for extracting data from search results.
use ldap3::SearchEntry;

/// An extension trait for [`SearchEntry`] that provides convenience methods for
/// extracting data.
pub trait SearchEntryExt {
	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str>;

	/// Get all textual values of an attribute, or an empty slice.
	fn attr_values(&self, attr: &str) -> &[String];

	/// Get the first value of an attribute, parsed as a number. Unparseable
	/// values are treated as absent.
	fn number_first(&self, attr: &str) -> Option<u16> {
		self.attr_first(attr).and_then(|value| value.trim().parse().ok())
	}
}

impl SearchEntryExt for SearchEntry {
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.attr_values(attr).first().map(String::as_str)
	}

	fn attr_values(&self, attr: &str) -> &[String] {
		// Attribute names are case-insensitive, servers may return any casing
		self.attrs
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(attr))
			.map(|(_, values)| values.as_slice())
			.unwrap_or_default()
	}
}
