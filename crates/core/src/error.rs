//! Error types surfaced by the expansion engine. There is one variant per
//! error kind; each message aggregates every underlying violation so a
//! single run reports everything it found. Nothing here is retried or
//! recovered locally; every kind is fatal to the batch.

use crate::{
    lua::PluginError,
    recipe::{ComponentIdentifier, ComponentName},
    schema::{MergeViolation, SchemaDiff, SchemaViolation},
    store::StoreError,
};
use itertools::Itertools;
use semver::{Version, VersionReq};
use thiserror::Error;

/// Any error that can abort an expansion batch
#[derive(Debug, Error)]
pub enum ExpansionError {
    /// The schema declared by a transformer artifact breaks the per-field
    /// invariants. A template-authoring error, reported before any expansion.
    #[error(
        "invalid parameter schema declared by template `{template}`: {}",
        .violations.iter().format("; ")
    )]
    TemplateAuthoring {
        template: ComponentIdentifier,
        violations: Vec<SchemaViolation>,
    },

    /// The transformer failed to produce its declared schema (or parameter
    /// shape) at all. Also a template-authoring error: the contract baked
    /// into the artifact is broken.
    #[error(
        "transformer for template `{template}` failed to report its \
        parameter schema: {cause:#}"
    )]
    SchemaUnavailable {
        template: ComponentIdentifier,
        cause: anyhow::Error,
    },

    /// The schema declared by the transformer artifact and the schema
    /// embedded in the template recipe disagree
    #[error(
        "parameter schema declared by the transformer for template \
        `{template}` does not match the schema in its recipe: {}",
        .differences.iter().format("; ")
    )]
    SchemaMismatch {
        template: ComponentIdentifier,
        differences: Vec<SchemaDiff>,
    },

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    RecipeTransformer(#[from] RecipeTransformerError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A recipe's declared dependencies break the template-dependency rules, or
/// can't be resolved against what's on disk
#[derive(Debug, Error)]
pub enum DependencyError {
    /// Two recipe files resolved to the same `(name, version)` identifier
    #[error(
        "duplicate recipe for component `{0}`; identifiers must be unique \
        within a deployment"
    )]
    DuplicateIdentifier(ComponentIdentifier),

    /// A template declared a dependency on another template
    #[error(
        "templates cannot depend on other templates: `{template}` depends \
        on `{dependency}`"
    )]
    TemplateOnTemplate {
        template: ComponentIdentifier,
        dependency: ComponentName,
    },

    /// A parameter file declared more than one template dependency
    #[error(
        "parameter file `{component}` has multiple template dependencies: {}",
        .templates.iter().format(", ")
    )]
    MultipleTemplateDependencies {
        component: ComponentIdentifier,
        templates: Vec<ComponentName>,
    },

    /// The named template exists locally, but not at a version satisfying
    /// the declared range
    #[error(
        "component `{component}` depends on a version of `{dependency}` \
        that can't be found locally: requires {requirement}, found {found}"
    )]
    UnsatisfiedVersion {
        component: ComponentIdentifier,
        dependency: ComponentName,
        requirement: VersionReq,
        found: Version,
    },

    /// A dependency that is recognizably a template has no local resolution
    /// at all
    #[error(
        "component `{component}` depends on template `{dependency}` that \
        can't be found locally"
    )]
    MissingTemplate {
        component: ComponentIdentifier,
        dependency: ComponentName,
    },
}

/// A template or its transformer misbehaved during expansion
#[derive(Debug, Error)]
pub enum RecipeTransformerError {
    /// Templates carry no lifecycle; the transformer produces it
    #[error(
        "templates cannot have a non-empty lifecycle: `{0}` declares \
        lifecycle steps"
    )]
    TemplateHasLifecycle(ComponentIdentifier),

    /// Caller-supplied parameter values failed to validate/merge against
    /// the template's schema
    #[error(
        "invalid parameters for component `{component}`: {}",
        .violations.iter().format("; ")
    )]
    InvalidParameters {
        component: ComponentIdentifier,
        violations: Vec<MergeViolation>,
    },

    /// The merged parameter bag doesn't cover the record type the
    /// transformer consumes
    #[error(
        "merged parameters for component `{component}` are missing fields \
        the transformer consumes: {}",
        .missing.iter().format(", ")
    )]
    ShapeMismatch {
        component: ComponentIdentifier,
        missing: Vec<String>,
    },

    /// `transform` itself failed
    #[error(
        "transformer for template `{template}` failed to expand \
        `{component}`: {cause:#}"
    )]
    TransformFailed {
        template: ComponentName,
        component: ComponentIdentifier,
        cause: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParameterType, ValueType};
    use kiln_util::Factory;

    /// Aggregated violations all land in a single message
    #[test]
    fn test_aggregated_display() {
        let error = ExpansionError::TemplateAuthoring {
            template: ComponentIdentifier::factory(("LoggerTemplate", "1.0.0")),
            violations: vec![
                SchemaViolation::RequiredWithDefault { field: "a".into() },
                SchemaViolation::DefaultTypeMismatch {
                    field: "b".into(),
                    declared: ParameterType::Number,
                    actual: ValueType::String,
                },
            ],
        };
        assert_eq!(
            error.to_string(),
            "invalid parameter schema declared by template \
            `LoggerTemplate@1.0.0`: required field `a` must not declare a \
            default value; default value for field `b` is string, expected \
            number"
        );
    }

    #[test]
    fn test_dependency_display() {
        let error = DependencyError::UnsatisfiedVersion {
            component: ComponentIdentifier::factory(("LoggerA", "1.0.0")),
            dependency: "TemplateX".into(),
            requirement: "^2.0".parse().unwrap(),
            found: "1.3.0".parse().unwrap(),
        };
        assert_eq!(
            error.to_string(),
            "component `LoggerA@1.0.0` depends on a version of `TemplateX` \
            that can't be found locally: requires ^2.0, found 1.3.0"
        );
    }
}
