//! The loader/planner: walks the recipe directory, classifies recipes, and
//! builds the per-template work plan the expansion driver executes. All
//! template-dependency rules are enforced here, before any transformer is
//! loaded, so a bad deployment fails before it does any work.

use crate::{
    error::{DependencyError, ExpansionError, RecipeTransformerError},
    recipe::{ComponentIdentifier, ComponentName, Recipe},
    store,
};
use std::{collections::BTreeMap, path::Path};
use tracing::{debug, trace};

/// Dependencies with this name suffix are recognizably templates even when
/// no local template resolves for them. Kept only for that one check; the
/// component type is what actually classifies a recipe.
const TEMPLATE_NAME_SUFFIX: &str = "Template";

/// The work plan for one expansion batch: every loaded recipe, the resolved
/// template per template name, and the parameter files paired with each
/// template. All maps are ordered, so iteration (and therefore expansion
/// and persistence order) is deterministic across runs.
#[derive(Debug, Default)]
pub struct ExpansionPlan {
    /// Every parseable recipe in the directory, by identifier
    recipes: BTreeMap<ComponentIdentifier, Recipe>,
    /// The resolved identifier per template name. Where multiple versions
    /// of a template exist, this holds the highest.
    templates: BTreeMap<ComponentName, ComponentIdentifier>,
    /// Parameter files paired with each template, sorted by
    /// `(name, version)`
    pairings: BTreeMap<ComponentName, Vec<ComponentIdentifier>>,
}

/// One template's slice of the plan
#[derive(Copy, Clone, Debug)]
pub struct Expansion<'a> {
    pub template: &'a ComponentIdentifier,
    pub template_recipe: &'a Recipe,
    pub parameter_files: &'a [ComponentIdentifier],
}

impl ExpansionPlan {
    /// Get a loaded recipe by identifier
    pub fn recipe(&self, id: &ComponentIdentifier) -> Option<&Recipe> {
        self.recipes.get(id)
    }

    /// The resolved identifiers of every template in the plan
    pub fn template_identifiers(
        &self,
    ) -> impl Iterator<Item = &ComponentIdentifier> {
        self.templates.values()
    }

    /// Iterate the planned expansions in lexicographic template-name order
    pub fn expansions(&self) -> impl Iterator<Item = Expansion<'_>> {
        self.pairings.iter().map(|(name, parameter_files)| {
            // Pairings are built from the template index, so both lookups
            // hold by construction
            let template = self
                .templates
                .get(name)
                .expect("template index out of sync with plan pairings");
            let template_recipe = self
                .recipes
                .get(template)
                .expect("plan recipe map missing template recipe");
            Expansion {
                template,
                template_recipe,
                parameter_files,
            }
        })
    }

    /// Total number of parameter files across all templates
    pub fn parameter_file_count(&self) -> usize {
        self.pairings.values().map(Vec::len).sum()
    }
}

/// Build the expansion plan for a recipe directory. Three passes: scan and
/// index, classify and validate dependency rules, then check that templates
/// carry no lifecycle.
pub fn build_plan(recipe_dir: &Path) -> Result<ExpansionPlan, ExpansionError> {
    let mut plan = scan(recipe_dir)?;
    classify(&mut plan)?;
    check_template_lifecycles(&plan)?;
    debug!(
        templates = plan.templates.len(),
        parameter_files = plan.parameter_file_count(),
        "Built expansion plan"
    );
    Ok(plan)
}

/// Pass 1: index every parseable recipe by identifier, and every template
/// additionally by name (keeping the highest version per name)
fn scan(recipe_dir: &Path) -> Result<ExpansionPlan, ExpansionError> {
    let mut plan = ExpansionPlan::default();
    for result in store::list_recipes(recipe_dir) {
        let (path, recipe) = result?;
        let id = recipe.identifier();
        trace!(component = %id, path = %path.display(), "Indexed recipe");

        if recipe.is_template() {
            plan.templates
                .entry(id.name.clone())
                .and_modify(|resolved| {
                    if id.version > resolved.version {
                        *resolved = id.clone();
                    }
                })
                .or_insert_with(|| id.clone());
        }
        if plan.recipes.insert(id.clone(), recipe).is_some() {
            return Err(DependencyError::DuplicateIdentifier(id).into());
        }
    }
    Ok(plan)
}

/// Pass 2: pair each parameter file with its template and enforce the
/// dependency rules
fn classify(plan: &mut ExpansionPlan) -> Result<(), ExpansionError> {
    let mut pairings: BTreeMap<ComponentName, Vec<ComponentIdentifier>> = plan
        .templates
        .keys()
        .map(|name| (name.clone(), Vec::new()))
        .collect();

    // The recipe map is ordered by (name, version), so each pairing list
    // comes out sorted without an explicit sort
    for (id, recipe) in &plan.recipes {
        let mut bound = Vec::new();
        for (dependency, properties) in &recipe.component_dependencies {
            let Some(template) = plan.templates.get(dependency) else {
                if dependency.ends_with(TEMPLATE_NAME_SUFFIX) {
                    return Err(DependencyError::MissingTemplate {
                        component: id.clone(),
                        dependency: dependency.clone(),
                    }
                    .into());
                }
                // An ordinary dependency; not this engine's concern
                trace!(
                    component = %id,
                    %dependency,
                    "Ignoring non-template dependency"
                );
                continue;
            };
            if !properties.version_requirement.matches(&template.version) {
                return Err(DependencyError::UnsatisfiedVersion {
                    component: id.clone(),
                    dependency: dependency.clone(),
                    requirement: properties.version_requirement.clone(),
                    found: template.version.clone(),
                }
                .into());
            }
            bound.push(dependency.clone());
        }

        // A template must never sit on the parameter-file side of an edge
        if recipe.is_template() {
            if let Some(dependency) = bound.into_iter().next() {
                return Err(DependencyError::TemplateOnTemplate {
                    template: id.clone(),
                    dependency,
                }
                .into());
            }
            continue;
        }

        match bound.as_slice() {
            [] => {}
            [template] => {
                pairings
                    .get_mut(template)
                    .expect("pairing list missing for resolved template")
                    .push(id.clone());
            }
            _ => {
                return Err(DependencyError::MultipleTemplateDependencies {
                    component: id.clone(),
                    templates: bound,
                }
                .into());
            }
        }
    }

    plan.pairings = pairings;
    Ok(())
}

/// Pass 3: templates must have an empty lifecycle everywhere
fn check_template_lifecycles(
    plan: &ExpansionPlan,
) -> Result<(), ExpansionError> {
    for (id, recipe) in &plan.recipes {
        if recipe.is_template() && recipe.has_lifecycle() {
            return Err(RecipeTransformerError::TemplateHasLifecycle(
                id.clone(),
            )
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{
        ComponentType, DependencyProperties, LifecycleStep, PlatformManifest,
    };
    use kiln_util::{Factory, TempDir, assert_err, assert_matches, temp_dir};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::fs;

    fn write_recipe(dir: &Path, recipe: &Recipe) {
        let file = format!(
            "{name}-{version}.yaml",
            name = recipe.component_name,
            version = recipe.component_version
        );
        fs::write(dir.join(file), recipe.to_yaml().unwrap()).unwrap();
    }

    fn template(name: &str, version: &str) -> Recipe {
        Recipe {
            component_type: ComponentType::Template,
            ..Recipe::factory((name, version))
        }
    }

    fn parameter_file(
        name: &str,
        version: &str,
        dependencies: &[(&str, &str)],
    ) -> Recipe {
        Recipe {
            component_dependencies: dependencies
                .iter()
                .map(|(dependency, requirement)| {
                    (
                        (*dependency).into(),
                        DependencyProperties {
                            version_requirement: requirement.parse().unwrap(),
                            dependency_type: None,
                        },
                    )
                })
                .collect(),
            ..Recipe::factory((name, version))
        }
    }

    /// Templates come out in lexicographic name order; parameter files in
    /// `(name, version)` order; non-template dependencies are ignored
    #[rstest]
    fn test_plan_pairing_and_order(temp_dir: TempDir) {
        write_recipe(&temp_dir, &template("BetaTemplate", "1.0.0"));
        write_recipe(&temp_dir, &template("AlphaTemplate", "1.0.0"));
        write_recipe(
            &temp_dir,
            &parameter_file("Beta1", "1.0.0", &[("BetaTemplate", "^1.0")]),
        );
        write_recipe(
            &temp_dir,
            &parameter_file("Alpha2", "1.0.0", &[("AlphaTemplate", "^1.0")]),
        );
        write_recipe(
            &temp_dir,
            &parameter_file("Alpha1", "1.0.0", &[("AlphaTemplate", "^1.0")]),
        );
        // Ordinary dependency on something that isn't present locally
        write_recipe(
            &temp_dir,
            &parameter_file("Standalone", "1.0.0", &[("SomeLib", "^1.0")]),
        );

        let plan = build_plan(&temp_dir).unwrap();
        let expansions = plan
            .expansions()
            .map(|expansion| {
                (
                    expansion.template.to_string(),
                    expansion
                        .parameter_files
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>(),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            expansions,
            vec![
                (
                    "AlphaTemplate@1.0.0".to_owned(),
                    vec!["Alpha1@1.0.0".to_owned(), "Alpha2@1.0.0".to_owned()],
                ),
                ("BetaTemplate@1.0.0".to_owned(), vec!["Beta1@1.0.0".to_owned()]),
            ]
        );
        assert_eq!(plan.parameter_file_count(), 3);
    }

    /// When multiple versions of a template are present, the highest wins
    #[rstest]
    fn test_highest_template_version(temp_dir: TempDir) {
        write_recipe(&temp_dir, &template("LoggerTemplate", "1.0.0"));
        write_recipe(&temp_dir, &template("LoggerTemplate", "1.2.0"));
        write_recipe(
            &temp_dir,
            &parameter_file("LoggerA", "1.0.0", &[("LoggerTemplate", "^1.0")]),
        );

        let plan = build_plan(&temp_dir).unwrap();
        let expansion = plan.expansions().next().unwrap();
        assert_eq!(expansion.template.version, "1.2.0".parse().unwrap());
        assert_eq!(expansion.parameter_files.len(), 1);
    }

    /// Two recipe files with the same `(name, version)` can't coexist
    #[rstest]
    fn test_duplicate_identifier(temp_dir: TempDir) {
        let recipe = Recipe::factory(("Dupe", "1.0.0"));
        fs::write(temp_dir.join("a.yaml"), recipe.to_yaml().unwrap()).unwrap();
        fs::write(temp_dir.join("b.yaml"), recipe.to_yaml().unwrap()).unwrap();

        assert_err!(
            build_plan(&temp_dir),
            "duplicate recipe for component `Dupe@1.0.0`"
        );
    }

    #[rstest]
    fn test_template_depends_on_template(temp_dir: TempDir) {
        write_recipe(&temp_dir, &template("BaseTemplate", "1.0.0"));
        let derived = Recipe {
            component_type: ComponentType::Template,
            ..parameter_file(
                "DerivedTemplate",
                "1.0.0",
                &[("BaseTemplate", "^1.0")],
            )
        };
        write_recipe(&temp_dir, &derived);

        assert_err!(
            build_plan(&temp_dir),
            "templates cannot depend on other templates"
        );
    }

    #[rstest]
    fn test_multiple_template_dependencies(temp_dir: TempDir) {
        write_recipe(&temp_dir, &template("AlphaTemplate", "1.0.0"));
        write_recipe(&temp_dir, &template("BetaTemplate", "1.0.0"));
        write_recipe(
            &temp_dir,
            &parameter_file(
                "Greedy",
                "1.0.0",
                &[("AlphaTemplate", "^1.0"), ("BetaTemplate", "^1.0")],
            ),
        );

        let error = build_plan(&temp_dir).unwrap_err();
        assert_matches!(
            &error,
            ExpansionError::Dependency(
                DependencyError::MultipleTemplateDependencies { .. }
            )
        );
        assert_err!(
            Err::<(), _>(error),
            "parameter file `Greedy@1.0.0` has multiple template dependencies"
        );
    }

    /// The template exists, but not at a satisfying version
    #[rstest]
    fn test_unsatisfied_version(temp_dir: TempDir) {
        write_recipe(&temp_dir, &template("TemplateX", "1.3.0"));
        write_recipe(
            &temp_dir,
            &parameter_file("Consumer", "1.0.0", &[("TemplateX", "^2.0")]),
        );

        assert_err!(build_plan(&temp_dir), "can't be found locally");
    }

    /// A dependency that looks like a template but has no local resolution
    /// is an error; other absent dependencies are not
    #[rstest]
    fn test_missing_template(temp_dir: TempDir) {
        write_recipe(
            &temp_dir,
            &parameter_file("Orphan", "1.0.0", &[("GhostTemplate", "^1.0")]),
        );

        assert_err!(
            build_plan(&temp_dir),
            "depends on template `GhostTemplate` that can't be found locally"
        );
    }

    /// Templates must not declare lifecycle steps anywhere
    #[rstest]
    fn test_template_with_lifecycle(temp_dir: TempDir) {
        let mut bad = template("SneakyTemplate", "1.0.0");
        bad.manifests = vec![PlatformManifest {
            lifecycle: [(
                "run".to_owned(),
                LifecycleStep::Command("echo nope".into()),
            )]
            .into_iter()
            .collect(),
            ..PlatformManifest::default()
        }];
        write_recipe(&temp_dir, &bad);

        let error = build_plan(&temp_dir).unwrap_err();
        assert_matches!(
            &error,
            ExpansionError::RecipeTransformer(
                RecipeTransformerError::TemplateHasLifecycle(_)
            )
        );
        assert_err!(
            Err::<(), _>(error),
            "templates cannot have a non-empty lifecycle"
        );
    }
}
