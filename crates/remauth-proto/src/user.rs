//! Identity of the user who scanned the QR code.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// User identity revealed by a `pending_finish` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteUser {
    /// Account snowflake.
    pub id: String,
    /// Four-digit discriminator (`"0"` for migrated usernames).
    pub discriminator: String,
    /// Avatar hash; `None` when the account has no avatar.
    pub avatar: Option<String>,
    /// Username.
    pub username: String,
}

impl RemoteUser {
    /// Parse the decrypted `id:discriminator:avatar:username` payload.
    ///
    /// The username is the last field and keeps any colons it contains.
    ///
    /// # Errors
    ///
    /// Returns an error if a field is missing or the id/username is empty.
    pub fn from_payload(payload: &str) -> Result<Self, ProtoError> {
        let mut fields = payload.splitn(4, ':');

        let id = fields.next().filter(|s| !s.is_empty()).ok_or(ProtoError::MissingField("id"))?;
        let discriminator = fields.next().ok_or(ProtoError::MissingField("discriminator"))?;
        let avatar = fields.next().ok_or(ProtoError::MissingField("avatar"))?;
        let username = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(ProtoError::MissingField("username"))?;

        let avatar = match avatar {
            "" | "0" => None,
            hash => Some(hash.to_string()),
        };

        Ok(Self {
            id: id.to_string(),
            discriminator: discriminator.to_string(),
            avatar,
            username: username.to_string(),
        })
    }

    /// `username#discriminator`, or just the username for migrated accounts.
    #[must_use]
    pub fn tag(&self) -> String {
        match self.discriminator.as_str() {
            "" | "0" => self.username.clone(),
            d => format!("{}#{d}", self.username),
        }
    }
}

impl fmt::Display for RemoteUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.tag(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_full_payload() {
        let user = RemoteUser::from_payload("80351110224678912:1337:8342729096ea3675442027381ff50dfe:Nelly")
            .expect("payload should parse");

        assert_eq!(user.id, "80351110224678912");
        assert_eq!(user.discriminator, "1337");
        assert_eq!(user.avatar.as_deref(), Some("8342729096ea3675442027381ff50dfe"));
        assert_eq!(user.username, "Nelly");
        assert_eq!(user.tag(), "Nelly#1337");
    }

    #[test]
    fn test_parse_without_avatar() {
        let user = RemoteUser::from_payload("42:0:0:someone").expect("payload should parse");
        assert!(user.avatar.is_none());
        assert_eq!(user.tag(), "someone");
    }

    #[test]
    fn test_username_keeps_colons() {
        let user = RemoteUser::from_payload("42:0001::a:b:c").expect("payload should parse");
        assert_eq!(user.username, "a:b:c");
        assert!(user.avatar.is_none());
    }

    #[test_case("" ; "empty payload")]
    #[test_case("42" ; "id only")]
    #[test_case("42:0001" ; "missing avatar")]
    #[test_case("42:0001:abc" ; "missing username")]
    #[test_case("42:0001:abc:" ; "empty username")]
    #[test_case(":0001:abc:name" ; "empty id")]
    fn malformed_payload_rejected(payload: &str) {
        assert!(matches!(
            RemoteUser::from_payload(payload),
            Err(ProtoError::MissingField(_))
        ));
    }
}
