// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length in bytes of any identifier.
pub const MAX_IDENTIFIER_LENGTH: usize = 256;

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, IdentityError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(IdentityError::Empty);
                }
                if value.len() > MAX_IDENTIFIER_LENGTH {
                    return Err(IdentityError::TooLong(value.len(), MAX_IDENTIFIER_LENGTH));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdentityError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Self::new(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentityError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

string_identifier!(
    /// Opaque identifier of a document, stable for the document's whole lifetime.
    DocumentId
);

string_identifier!(
    /// Logical client or editor session tag.
    ///
    /// One author can be connected with many clients at once (for example multiple browser
    /// tabs). Events carry the client id so the originating client can recognise its own echo.
    ClientId
);

string_identifier!(
    /// Identity of the acting author, already authorized by the caller.
    AuthorId
);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    /// Identifiers need at least one character.
    #[error("identifier can not be empty")]
    Empty,

    /// Invalid number of bytes.
    #[error("identifier length of {0} bytes exceeds maximum of {1} bytes")]
    TooLong(usize, usize),
}
