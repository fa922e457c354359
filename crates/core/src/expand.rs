//! The expansion driver: orchestrates the planner, the plugin host, and the
//! schema engine, and persists the results. One `process` call is one
//! batch; it either completes or fails as a whole, and recipes persisted
//! before a failure stay persisted (cleanup belongs to the caller).

use crate::{
    error::{ExpansionError, RecipeTransformerError},
    loader,
    lua::TransformerHost,
    recipe::ComponentIdentifier,
    schema,
    store::{ComponentStore, StoreError},
    transform::{self, Transformer},
};
use indexmap::IndexMap;
use kiln_util::ResultTraced;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the transformer plugin inside a template's artifact
/// directory
pub const TRANSFORMER_FILE: &str = "transformer.lua";

/// Where a template's transformer artifact lives:
/// `<artifactsDir>/<templateName>/<templateVersion>/transformer.lua`
pub fn transformer_artifact_path(
    artifacts_dir: &Path,
    template: &ComponentIdentifier,
) -> PathBuf {
    artifacts_dir
        .join(template.name.as_str())
        .join(template.version.to_string())
        .join(TRANSFORMER_FILE)
}

/// The template expansion engine. Owns a store gateway and a plugin host;
/// everything else is per-call state. The engine is re-entrant: a fresh
/// `process` call starts from empty in-memory state.
#[derive(Debug)]
pub struct ExpansionEngine<S> {
    store: S,
    host: TransformerHost,
}

impl<S: ComponentStore> ExpansionEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            host: TransformerHost::new(),
        }
    }

    /// The store this engine persists into
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Expand every parameter file in `recipe_dir` against its template and
    /// persist the generated recipes into the store. Runs single-threaded
    /// from start to return; templates expand in lexicographic name order
    /// and parameter files in `(name, version)` order, so output is
    /// deterministic. Any failure aborts the batch.
    pub fn process(
        &self,
        recipe_dir: &Path,
        artifacts_dir: &Path,
    ) -> Result<ExpansionReport, ExpansionError> {
        info!(
            recipe_dir = %recipe_dir.display(),
            artifacts_dir = %artifacts_dir.display(),
            "Expanding recipe templates"
        );
        // The plan (and with it all three in-memory maps) lives only inside
        // this call; back-to-back calls share no state
        let plan = loader::build_plan(recipe_dir)?;

        let mut expanded = Vec::new();
        for expansion in plan.expansions() {
            let artifact_path =
                transformer_artifact_path(artifacts_dir, expansion.template);
            let transformer = self
                .host
                .load(&artifact_path, expansion.template_recipe)?;
            let schema = transform::initialize_transformer(
                &transformer,
                expansion.template_recipe,
            )?;
            let shape = transformer.parameter_shape().map_err(|cause| {
                ExpansionError::SchemaUnavailable {
                    template: expansion.template.clone(),
                    cause,
                }
            })?;

            for id in expansion.parameter_files {
                let recipe = plan
                    .recipe(id)
                    .expect("plan pairing references unknown recipe");
                let empty = IndexMap::new();
                let caller_values =
                    recipe.default_configuration().unwrap_or(&empty);
                let params = schema::merge(&schema, caller_values).map_err(
                    |violations| RecipeTransformerError::InvalidParameters {
                        component: id.clone(),
                        violations,
                    },
                )?;
                let missing = shape.missing_from(&params);
                if !missing.is_empty() {
                    return Err(RecipeTransformerError::ShapeMismatch {
                        component: id.clone(),
                        missing,
                    }
                    .into());
                }

                let full =
                    transformer.transform(recipe, &params).map_err(|cause| {
                        RecipeTransformerError::TransformFailed {
                            template: expansion.template.name.clone(),
                            component: id.clone(),
                            cause,
                        }
                    })?;
                let full_id = full.identifier();
                let serialized = full.to_yaml().map_err(|source| {
                    StoreError::Serialize {
                        id: full_id.clone(),
                        source,
                    }
                })?;
                self.store
                    .save_package_recipe(&full_id, &serialized)
                    .traced()?;
                debug!(
                    component = %full_id,
                    template = %expansion.template,
                    "Expanded recipe persisted"
                );
                expanded.push(full_id);
            }
        }

        info!(expanded = expanded.len(), "Expansion complete");
        Ok(ExpansionReport {
            expanded,
            templates: plan.template_identifiers().cloned().collect(),
        })
    }

    /// Remove template recipes from the store after a successful expansion.
    /// This never runs automatically; callers that don't want template
    /// recipes visible to the deployment scheduler invoke it as a separate
    /// step with the report `process` returned.
    pub fn purge_templates(
        &self,
        report: &ExpansionReport,
    ) -> Result<(), StoreError> {
        for template in &report.templates {
            self.store.delete_component(template)?;
        }
        Ok(())
    }
}

/// What one `process` call did: every persisted expanded recipe, and every
/// template that ran, in expansion order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpansionReport {
    pub expanded: Vec<ComponentIdentifier>,
    pub templates: Vec<ComponentIdentifier>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{recipe::Recipe, store::FsComponentStore};
    use kiln_util::{Factory, TempDir, temp_dir};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_transformer_artifact_path() {
        let template = ComponentIdentifier::factory(("LoggerTemplate", "1.0.0"));
        assert_eq!(
            transformer_artifact_path(Path::new("/deploy/artifacts"), &template),
            Path::new("/deploy/artifacts/LoggerTemplate/1.0.0/transformer.lua")
        );
    }

    /// Purging removes exactly the report's template recipes from the store
    #[rstest]
    fn test_purge_templates(temp_dir: TempDir) {
        let engine = ExpansionEngine::new(FsComponentStore::new(&*temp_dir));
        let template = Recipe::factory(("LoggerTemplate", "1.0.0"));
        let other = Recipe::factory(("LoggerA", "1.0.0"));
        for recipe in [&template, &other] {
            engine
                .store()
                .save_package_recipe(
                    &recipe.identifier(),
                    &recipe.to_yaml().unwrap(),
                )
                .unwrap();
        }

        let report = ExpansionReport {
            expanded: vec![other.identifier()],
            templates: vec![template.identifier()],
        };
        engine.purge_templates(&report).unwrap();

        assert_eq!(
            engine
                .store()
                .load_package_recipe(&template.identifier())
                .unwrap(),
            None
        );
        assert_eq!(
            engine
                .store()
                .load_package_recipe(&other.identifier())
                .unwrap(),
            Some(other)
        );
    }
}
