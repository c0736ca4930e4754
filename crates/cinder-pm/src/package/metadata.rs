use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::package::Package;

/// The YAML wire format of a built package artifact: the package
/// definition plus the list of files the artifact unpacks.
///
/// This is the document accepted by `database create` to inject a
/// package into the installed database without unpacking anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub package: Package,

    #[serde(default)]
    pub files: Vec<String>,
}

impl PackageMetadata {
    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
