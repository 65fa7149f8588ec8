//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use crate::DeclarationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_newtype!(
    /// Name of a declared environment. Also the identity of its single instance.
    EnvName
);

string_newtype!(
    /// Engine-side reference of a built environment image (`cabin/<name>`).
    ImageTag
);

impl EnvName {
    /// Validate and wrap an environment name.
    ///
    /// Names are 1-64 characters of `[A-Za-z0-9_.-]` and may not start with
    /// `.` or `-`, so they are usable as file names and container names.
    pub fn parse(name: &str) -> Result<Self, DeclarationError> {
        if name.is_empty() || name.len() > 64 {
            return Err(DeclarationError::InvalidName(format!(
                "'{name}': must be 1-64 characters"
            )));
        }
        if name.starts_with('.') || name.starts_with('-') {
            return Err(DeclarationError::InvalidName(format!(
                "'{name}': must not start with '.' or '-'"
            )));
        }
        if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
        {
            return Err(DeclarationError::InvalidName(format!(
                "'{name}': must match [A-Za-z0-9_.-]"
            )));
        }
        Ok(Self(name.to_owned()))
    }

    /// Image reference the engine tags builds of this environment with.
    pub fn image_tag(&self) -> ImageTag {
        ImageTag(format!("cabin/{}", self.0.to_ascii_lowercase()))
    }

    /// Container name of the environment's single instance.
    pub fn instance_name(&self) -> String {
        format!("cabin-{}", self.0)
    }
}

impl std::str::FromStr for EnvName {
    type Err = DeclarationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
