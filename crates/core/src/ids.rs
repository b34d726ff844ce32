//! Chat platform identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! platform_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw platform id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw id.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Take the raw id.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

platform_id!(
    /// A chat server.
    GuildId
);
platform_id!(
    /// A text or category channel.
    ChannelId
);
platform_id!(
    /// A guild role.
    RoleId
);
platform_id!(
    /// A user or guild member.
    UserId
);
platform_id!(
    /// A message within a channel.
    MessageId
);

impl GuildId {
    /// The guild's implicit `@everyone` role shares the guild's id.
    #[must_use]
    pub fn everyone_role(&self) -> RoleId {
        RoleId::new(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_strings() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&ChannelId::new("123"))?;
        assert_eq!(json, "\"123\"");

        let parsed: RoleId = serde_json::from_str("\"456\"")?;
        assert_eq!(parsed.as_str(), "456");
        Ok(())
    }

    #[test]
    fn test_everyone_role_matches_guild() {
        let guild = GuildId::new("guild-1");
        assert_eq!(guild.everyone_role().as_str(), "guild-1");
    }
}
