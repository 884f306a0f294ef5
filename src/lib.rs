use std::fmt;

pub mod capability;
pub mod configuration;
pub mod db;
pub mod domain;
pub mod feed;
pub mod html;
pub mod links;
pub mod net;
pub mod orchestrator;
pub mod pipeline;
pub mod sender;
pub mod telemetry;

pub fn error_chain_fmt(err: &impl std::error::Error, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{}\n", err)?;
    let mut current = err.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}

#[macro_export]
macro_rules! debug_with_error_chain {
    ($t:ident) => {
        impl std::fmt::Debug for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                $crate::error_chain_fmt(self, f)
            }
        }
    };
}

/// Defines a `String`-backed id type whose default value is a random
/// `<prefix>_<16 url-safe-base64 bytes>` value.
#[macro_export]
macro_rules! prefixed_id {
    ($t:ident, $prefix:literal) => {
        #[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $t(pub String);

        impl Default for $t {
            fn default() -> Self {
                Self($crate::domain::generate_prefixed_id($prefix))
            }
        }

        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}
