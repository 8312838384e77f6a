//! Environment domain types

use serde::{Deserialize, Serialize};

/// A target environment that releases are promoted into.
///
/// Environments are long-lived external objects; the controller only
/// reads them to resolve deployment coordinates for a promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub spec: EnvironmentSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    /// Namespace the environment's releases are installed into.
    #[serde(default)]
    pub namespace: String,
    /// Cluster the namespace lives in, when not the controller's own.
    #[serde(default)]
    pub cluster: Option<String>,
    /// How promotions into this environment are applied, e.g. `Auto`.
    #[serde(default)]
    pub promotion_strategy: Option<String>,
}
