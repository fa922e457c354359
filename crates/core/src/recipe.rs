//! The plain data types that make up a component recipe. A recipe is the
//! declarative description of one deployable component: its identity, its
//! dependencies, its lifecycle, and (for templates) its parameter schema.

use crate::schema::ParameterSchema;
use derive_more::{Deref, Display, From};
use indexmap::IndexMap;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single component recipe, as loaded from a recipe file. Every value here
/// round-trips losslessly through the serializer: `parse(serialize(r)) == r`.
/// Fields that are absent in the input surface as their empty/absent value
/// rather than as parse errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Recipe {
    /// Version tag of the recipe file format itself
    #[serde(default)]
    pub recipe_format_version: RecipeFormatVersion,
    pub component_name: ComponentName,
    pub component_version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_description: Option<String>,
    #[serde(default, skip_serializing_if = "ComponentType::is_generic")]
    pub component_type: ComponentType,
    /// Dependencies on other components, keyed by component name
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub component_dependencies: IndexMap<ComponentName, DependencyProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_configuration: Option<ComponentConfiguration>,
    /// Declared parameter schema. Only meaningful for templates, where it
    /// must mirror the schema baked into the transformer artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_schema: Option<ParameterSchema>,
    /// Platform-independent lifecycle. Most recipes use per-manifest
    /// lifecycles instead; templates must have neither.
    #[serde(default, skip_serializing_if = "Lifecycle::is_empty")]
    pub lifecycle: Lifecycle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<PlatformManifest>,
}

impl Recipe {
    /// Parse a recipe from YAML text. Anchors/aliases are merged during
    /// parsing, so the parsed value is fully resolved.
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        kiln_util::parse_yaml(text.as_bytes())
    }

    /// Parse a recipe from JSON text
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let deserializer = &mut serde_json::Deserializer::from_str(text);
        Ok(serde_path_to_error::deserialize(deserializer)?)
    }

    /// Serialize this recipe back to YAML
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Get the `(name, version)` identifier of this recipe
    pub fn identifier(&self) -> ComponentIdentifier {
        ComponentIdentifier {
            name: self.component_name.clone(),
            version: self.component_version.clone(),
        }
    }

    /// Is this recipe a template? Component type is authoritative; the name
    /// of the component plays no part in the decision.
    pub fn is_template(&self) -> bool {
        self.component_type == ComponentType::Template
    }

    /// Does this recipe define any lifecycle step, either at the top level
    /// or in any platform manifest?
    pub fn has_lifecycle(&self) -> bool {
        !self.lifecycle.is_empty()
            || self.manifests.iter().any(|manifest| !manifest.lifecycle.is_empty())
    }

    /// Get the caller-supplied parameter values (for parameter files) or the
    /// declared defaults (for templates), if any configuration is present
    pub fn default_configuration(&self) -> Option<&IndexMap<String, Value>> {
        self.component_configuration
            .as_ref()
            .map(|configuration| &configuration.default_configuration)
    }
}

/// Version tag of the recipe file format. Unrecognized tags are carried
/// through untouched; it's the deployment pipeline's job to reject formats
/// it can't handle.
#[derive(
    Clone, Debug, Deref, Display, Eq, From, Hash, PartialEq, Serialize, Deserialize,
)]
pub struct RecipeFormatVersion(String);

impl RecipeFormatVersion {
    /// The format written by this version of the platform
    pub const CURRENT: &str = "2024-05-10";
}

impl Default for RecipeFormatVersion {
    fn default() -> Self {
        Self(Self::CURRENT.to_owned())
    }
}

/// Unique name of a component within a deployment
#[derive(
    Clone,
    Debug,
    Deref,
    Display,
    Eq,
    From,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
)]
pub struct ComponentName(String);

impl ComponentName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(any(test, feature = "test"))]
impl From<&str> for ComponentName {
    fn from(value: &str) -> Self {
        value.to_owned().into()
    }
}

/// The `(name, version)` identity of a recipe. Within a single expansion
/// plan there is at most one recipe per identifier. Ordering is lexicographic
/// by `(name, version)`, which is what makes plan output deterministic.
#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{name}@{version}")]
pub struct ComponentIdentifier {
    pub name: ComponentName,
    pub version: Version,
}

impl ComponentIdentifier {
    pub fn new(name: impl Into<ComponentName>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// What kind of component does a recipe describe?
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    /// An ordinary deployable component
    #[default]
    Generic,
    /// A recipe whose purpose is to produce other recipes. Templates have no
    /// lifecycle; they ship a transformer artifact instead.
    Template,
    /// A component loaded into the nucleus process itself
    Plugin,
}

impl ComponentType {
    fn is_generic(&self) -> bool {
        *self == Self::Generic
    }
}

/// Properties attached to a single dependency edge
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct DependencyProperties {
    /// Semver range the dependency must satisfy
    pub version_requirement: VersionReq,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<DependencyType>,
}

/// Whether a dependency failure is fatal to the dependent component. The
/// expansion engine carries this through untouched; only the deployment
/// scheduler acts on it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Hard,
    Soft,
}

/// Caller-supplied parameter values (parameter files) or declared defaults
/// (templates)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ComponentConfiguration {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub default_configuration: IndexMap<String, Value>,
}

/// One platform-specific manifest: a platform matcher plus the lifecycle and
/// artifacts that apply when the matcher selects the host
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct PlatformManifest {
    /// Free-form matcher, e.g. `{os: linux, architecture: aarch64}`. An
    /// empty matcher matches every platform.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub platform: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Lifecycle::is_empty")]
    pub lifecycle: Lifecycle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactSpec>,
}

/// A mapping from lifecycle phase (`install`, `run`, `startup`, ...) to the
/// step executed in that phase
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lifecycle(IndexMap<String, LifecycleStep>);

impl Lifecycle {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the step for one lifecycle phase
    pub fn get(&self, phase: &str) -> Option<&LifecycleStep> {
        self.0.get(phase)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LifecycleStep)> {
        self.0.iter()
    }
}

impl FromIterator<(String, LifecycleStep)> for Lifecycle {
    fn from_iter<I: IntoIterator<Item = (String, LifecycleStep)>>(
        iter: I,
    ) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A single lifecycle step: either a bare shell command, or a structured
/// step with additional settings (timeout, environment, ...)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LifecycleStep {
    Command(String),
    Structured(IndexMap<String, Value>),
}

impl LifecycleStep {
    /// Get the shell command of this step, if it's a bare command
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Command(command) => Some(command),
            Self::Structured(_) => None,
        }
    }
}

/// A reference to one artifact shipped with a component. The expansion
/// engine holds these losslessly; fetching and verification belong to the
/// deployment pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ArtifactSpec {
    #[serde(rename = "URI")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unarchive: Option<String>,
}

#[cfg(any(test, feature = "test"))]
impl kiln_util::Factory for Recipe {
    fn factory(_: ()) -> Self {
        Self::factory(("component", "1.0.0"))
    }
}

/// Create a generic recipe with a fixed name and version
#[cfg(any(test, feature = "test"))]
impl kiln_util::Factory<(&str, &str)> for Recipe {
    fn factory((name, version): (&str, &str)) -> Self {
        Self {
            recipe_format_version: RecipeFormatVersion::default(),
            component_name: name.into(),
            component_version: version.parse().unwrap(),
            component_description: None,
            component_type: ComponentType::Generic,
            component_dependencies: IndexMap::new(),
            component_configuration: None,
            parameter_schema: None,
            lifecycle: Lifecycle::default(),
            manifests: Vec::new(),
        }
    }
}

#[cfg(any(test, feature = "test"))]
impl kiln_util::Factory<(&str, &str)> for ComponentIdentifier {
    fn factory((name, version): (&str, &str)) -> Self {
        Self::new(name, version.parse().unwrap())
    }
}
