//! Address normalization.
//!
//! Every address-accepting setter on [`Message`](super::Message) takes
//! `impl Into<AddressSet>`, so a bare `"a@x.com"`, a single
//! `("a@x.com", "Alice")` pair, or a list mixing both all end up in the same
//! canonical form: an ordered list of `(email, display name)` entries.
//!
//! No syntax checking happens here. Malformed addresses are reported by the
//! transport that renders the message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single mailbox: email plus optional display name (empty when absent).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl Address {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }

    /// Display name, if one was supplied.
    pub fn display_name(&self) -> Option<&str> {
        if self.name.is_empty() {
            None
        } else {
            Some(&self.name)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.display_name() {
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => f.write_str(&self.email),
        }
    }
}

/// Positional entry: the value is the email, no display name.
impl From<&str> for Address {
    fn from(email: &str) -> Self {
        Self::new(email, "")
    }
}

impl From<String> for Address {
    fn from(email: String) -> Self {
        Self::new(email, "")
    }
}

impl From<&String> for Address {
    fn from(email: &String) -> Self {
        Self::new(email.as_str(), "")
    }
}

/// Keyed entry: `(email, display name)`.
impl<E: Into<String>, N: Into<String>> From<(E, N)> for Address {
    fn from((email, name): (E, N)) -> Self {
        Self::new(email, name)
    }
}

/// Ordered, de-duplicated list of addresses.
///
/// Entries always carry a non-empty email. Repeating an email keeps its first
/// position and takes the later display name, the same way a keyed mapping
/// would behave.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressSet(Vec<Address>);

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the canonical form from any sequence of entries.
    pub fn normalize<I>(entries: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Address>,
    {
        let mut set = Self::new();
        for entry in entries {
            set.push(entry.into());
        }
        set
    }

    /// Append an entry, applying the same rules as [`AddressSet::normalize`].
    pub fn push(&mut self, address: Address) {
        let email = address.email.trim();
        if email.is_empty() {
            return;
        }

        let name = address.name.trim().to_string();
        match self.0.iter_mut().find(|a| a.email == email) {
            Some(existing) => existing.name = name,
            None => self.0.push(Address {
                email: email.to_string(),
                name,
            }),
        }
    }

    pub fn first(&self) -> Option<&Address> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Address> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bare emails, in order.
    pub fn emails(&self) -> Vec<&str> {
        self.0.iter().map(|a| a.email.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a AddressSet {
    type Item = &'a Address;
    type IntoIter = std::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Address> for AddressSet {
    fn from(address: Address) -> Self {
        Self::normalize([address])
    }
}

impl From<&str> for AddressSet {
    fn from(email: &str) -> Self {
        Self::normalize([email])
    }
}

impl From<String> for AddressSet {
    fn from(email: String) -> Self {
        Self::normalize([email])
    }
}

impl From<&String> for AddressSet {
    fn from(email: &String) -> Self {
        Self::normalize([email])
    }
}

impl<E: Into<String>, N: Into<String>> From<(E, N)> for AddressSet {
    fn from(pair: (E, N)) -> Self {
        Self::normalize([Address::from(pair)])
    }
}

impl<T: Into<Address>> From<Vec<T>> for AddressSet {
    fn from(entries: Vec<T>) -> Self {
        Self::normalize(entries)
    }
}

impl<T: Into<Address>, const N: usize> From<[T; N]> for AddressSet {
    fn from(entries: [T; N]) -> Self {
        Self::normalize(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_string_becomes_single_entry() {
        let set = AddressSet::from("b@y.com");

        assert_eq!(set.len(), 1);
        assert_eq!(set.first(), Some(&Address::new("b@y.com", "")));
        assert_eq!(set.first().unwrap().display_name(), None);
    }

    #[test]
    fn test_pairs_keep_names_in_insertion_order() {
        let set = AddressSet::from([
            ("zed@example.com", "Zed"),
            ("amy@example.com", "Amy"),
            ("max@example.com", "Max"),
        ]);

        let names: Vec<_> = set.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(set.emails(), vec!["zed@example.com", "amy@example.com", "max@example.com"]);
        assert_eq!(names, vec!["Zed", "Amy", "Max"]);
    }

    #[test]
    fn test_positional_and_keyed_entries_mix() {
        let set = AddressSet::from(vec![
            Address::from("plain@example.com"),
            Address::from(("named@example.com", "Named")),
        ]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.first().unwrap().name, "");
        assert_eq!(set.iter().nth(1).unwrap().name, "Named");
    }

    #[test]
    fn test_blank_emails_are_dropped() {
        let set = AddressSet::from(vec!["", "  ", "ok@example.com"]);
        assert_eq!(set.emails(), vec!["ok@example.com"]);
    }

    #[test]
    fn test_repeated_email_keeps_first_position_and_last_name() {
        let set = AddressSet::from([
            ("a@example.com", "First"),
            ("b@example.com", ""),
            ("a@example.com", "Second"),
        ]);

        assert_eq!(set.emails(), vec!["a@example.com", "b@example.com"]);
        assert_eq!(set.first().unwrap().name, "Second");
    }

    #[test]
    fn test_display_formats_mailbox() {
        assert_eq!(Address::new("a@x.com", "Alice").to_string(), "Alice <a@x.com>");
        assert_eq!(Address::from("a@x.com").to_string(), "a@x.com");
    }
}
