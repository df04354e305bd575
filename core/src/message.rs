//! Message envelopes and header multimaps.
//!
//! A [`Message`] is created by the sender and handed to the interceptor
//! pipeline by value. Interceptors work on their own copy of the envelope, so
//! header edits are never visible to a concurrent reader of the original.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use smallvec::SmallVec;

/// Ordered multimap of message headers.
///
/// Insertion order is preserved and a name may carry several values. Names are
/// compared ASCII-case-insensitively (`Trace.Id` and `trace.id` are the same
/// header); the spelling of the first insertion is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: SmallVec<[(String, String); 4]>,
}

impl Headers {
    /// Create an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value for `name`, keeping existing values.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with a single `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// First value stored for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All values stored for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Remove every value of `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// Check whether `name` has at least one value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of `(name, value)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        headers.extend(iter);
        headers
    }
}

impl<K, V> Extend<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.add(name, value);
        }
    }
}

/// Immutable message envelope routed by the event bus.
///
/// Fields are private; build a message with [`Message::new`] and the consuming
/// `with_*` methods.
///
/// # Example
///
/// ```
/// use contextual_bus_core::message::Message;
///
/// let message = Message::new("foo", "bar")
///     .with_header("trace.id", "abc123");
///
/// assert_eq!(message.address(), "foo");
/// assert_eq!(message.body_str(), Some("bar"));
/// assert_eq!(message.headers().get("trace.id"), Some("abc123"));
/// assert_eq!(message.reply_address(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    address: String,
    body: Bytes,
    headers: Headers,
    reply_address: Option<String>,
}

impl Message {
    /// Create a message for `address` with no headers and no reply address.
    #[must_use]
    pub fn new(address: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            address: address.into(),
            body: body.into(),
            headers: Headers::new(),
            reply_address: None,
        }
    }

    /// Replace the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Append one header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Set the address replies should be sent to.
    #[must_use]
    pub fn with_reply_address(mut self, reply_address: impl Into<String>) -> Self {
        self.reply_address = Some(reply_address.into());
        self
    }

    /// Destination address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Raw body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the body is not valid JSON for `T`.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Headers in insertion order.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable headers. Only reachable on an owned copy, which is how
    /// interceptors receive envelopes.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Address replies should be sent to, when the sender expects one.
    #[must_use]
    pub fn reply_address(&self) -> Option<&str> {
        self.reply_address.as_deref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_headers_keep_multiple_values_in_order() {
        let mut headers = Headers::new();
        headers.add("accept", "text/plain");
        headers.add("trace.id", "abc");
        headers.add("accept", "application/json");

        assert_eq!(headers.get("accept"), Some("text/plain"));
        assert_eq!(
            headers.get_all("accept").collect::<Vec<_>>(),
            vec!["text/plain", "application/json"]
        );
        assert_eq!(
            headers.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            vec!["accept", "trace.id", "accept"]
        );
    }

    #[test]
    fn test_header_names_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.add("Trace.Id", "abc");

        assert_eq!(headers.get("trace.id"), Some("abc"));
        assert!(headers.contains("TRACE.ID"));
        assert_eq!(headers.remove("trace.ID"), 1);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_set_replaces_all_values() {
        let mut headers: Headers = [("trace.id", "a"), ("trace.id", "b")].into_iter().collect();
        headers.set("trace.id", "c");

        assert_eq!(headers.get_all("trace.id").collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_message_builders() {
        let message = Message::new("foo", "bar")
            .with_header("trace.id", "abc")
            .with_reply_address("reply.1");

        assert_eq!(message.address(), "foo");
        assert_eq!(message.body(), &Bytes::from_static(b"bar"));
        assert_eq!(message.headers().get("trace.id"), Some("abc"));
        assert_eq!(message.reply_address(), Some("reply.1"));
    }

    #[test]
    fn test_editing_a_copy_leaves_original_untouched() {
        let original = Message::new("foo", "bar").with_header("trace.id", "abc");
        let mut copy = original.clone();
        copy.headers_mut().set("trace.id", "xyz");

        assert_eq!(original.headers().get("trace.id"), Some("abc"));
        assert_eq!(copy.headers().get("trace.id"), Some("xyz"));
    }

    #[test]
    fn test_body_json() {
        let message = Message::new("orders", r#"{"id":7}"#);
        let value: serde_json::Value = message.body_json().unwrap();
        assert_eq!(value["id"], 7);

        let invalid = Message::new("orders", vec![0xff, 0xfe]);
        assert!(invalid.body_str().is_none());
        assert!(invalid.body_json::<serde_json::Value>().is_err());
    }

    proptest! {
        #[test]
        fn prop_get_all_returns_every_added_value(values in proptest::collection::vec("[a-z0-9]{1,8}", 1..8)) {
            let mut headers = Headers::new();
            for value in &values {
                headers.add("x-key", value.clone());
            }

            let stored: Vec<String> = headers.get_all("X-KEY").map(str::to_string).collect();
            prop_assert_eq!(stored, values.clone());
            prop_assert_eq!(headers.get("x-key"), values.first().map(String::as_str));
        }
    }
}
