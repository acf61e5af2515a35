//! Redaction wrapper for gateway passwords and local signing keys.
//!
//! [`Redacted`] prints and serializes as `"<redacted>"` but still deserializes the
//! real value, so a token-pair file can carry a tooling key without that key ever
//! reaching a log line or a `/status` response.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Debug, Display};

/// Wrapper that hides its inner value from `Debug`, `Display` and `Serialize`.
///
/// ```ignore
/// use bridge_core::redact::Redacted;
///
/// let password = Redacted("hunter2".to_string());
/// tracing::info!(password = %password, "Gateway auth configured");
/// // Logs: password = <redacted>
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Redacted<T>(pub T);

impl<T> Redacted<T> {
    /// Borrow the secret. Call sites are easy to grep for.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<T> Serialize for Redacted<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        "<redacted>".serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Redacted<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Redacted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_hide_value() {
        let secret = Redacted("5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3".to_string());
        assert_eq!(format!("{:?}", secret), "<redacted>");
        assert_eq!(format!("{}", secret), "<redacted>");
    }

    #[test]
    fn test_serialize_hides_value_deserialize_keeps_it() {
        let parsed: Redacted<String> = serde_json::from_str("\"top-secret\"").unwrap();
        assert_eq!(parsed.expose(), "top-secret");
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"<redacted>\"");
    }
}
