//! Common utilities that aren't specific to one other subcrate and are
//! unlikely to change frequently. The main purpose of this is to pull logic
//! out of the core crate, because that one changes a lot and requires
//! constant recompilation.
//!
//! **This crate is not semver compliant**. The version is locked to the Kiln
//! workspace version. If you choose to depend directly on this crate, you do
//! so at your own risk of breakage.

pub mod paths;
#[cfg(any(test, feature = "test"))]
mod test_util;

#[cfg(any(test, feature = "test"))]
pub use test_util::*;

use serde::de::DeserializeOwned;
use std::{fmt::Display, io::Read};
use tracing::error;

/// Parse bytes from a reader into YAML. This will merge any anchors/aliases.
pub fn parse_yaml<T: DeserializeOwned>(reader: impl Read) -> anyhow::Result<T> {
    // We use two-step parsing to enable pre-processing on the YAML

    // Parse into a YAML value
    let deserializer = serde_yaml::Deserializer::from_reader(reader);
    let mut yaml_value: serde_yaml::Value =
        serde_path_to_error::deserialize(deserializer)?;

    // Merge anchors+aliases
    yaml_value.apply_merge()?;

    let output = serde_path_to_error::deserialize(yaml_value)?;
    Ok(output)
}

/// Extension trait for [Result]
pub trait ResultTraced<T, E>: Sized {
    /// If this is an error, trace it. Return the same result.
    #[must_use]
    fn traced(self) -> Self;
}

impl<T, E: Display> ResultTraced<T, E> for Result<T, E> {
    fn traced(self) -> Self {
        self.inspect_err(|error| error!(%error))
    }
}
