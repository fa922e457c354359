//! The component store gateway: how the engine reads recipe directories and
//! persists expanded recipes. The rest of the engine never touches the
//! filesystem directly; everything goes through [ComponentStore] or
//! [list_recipes], which keeps the core testable against any store shape.

use crate::recipe::{ComponentIdentifier, Recipe};
use kiln_util::paths;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Reserved suffix marking a file as sidecar metadata rather than a recipe.
/// Sidecar files are skipped during recipe directory scans.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Directory under the store root holding persisted recipes
const RECIPES_DIR: &str = "recipes";
/// Directory under the store root holding component artifacts
const ARTIFACTS_DIR: &str = "artifacts";

/// Read/write/delete access to the component store. The engine is the sole
/// writer for the duration of a `process` call; a write is visible to any
/// subsequent read in the same call.
pub trait ComponentStore {
    /// Persist a serialized recipe for the given identifier. Idempotent:
    /// overwrites any existing recipe for the same identifier.
    fn save_package_recipe(
        &self,
        id: &ComponentIdentifier,
        serialized: &str,
    ) -> Result<(), StoreError>;

    /// Read back a persisted recipe, if one exists for the identifier
    fn load_package_recipe(
        &self,
        id: &ComponentIdentifier,
    ) -> Result<Option<Recipe>, StoreError>;

    /// Remove a persisted recipe. Removing an identifier that was never
    /// persisted is not an error.
    fn delete_component(
        &self,
        id: &ComponentIdentifier,
    ) -> Result<(), StoreError>;

    /// Where do this component's artifacts live? Pure function of the
    /// identifier and the store root; the directory may not exist.
    fn artifact_directory_path(&self, id: &ComponentIdentifier) -> PathBuf;
}

/// Walk a recipe directory (flat or nested) and parse every recipe
/// candidate. Directories and sidecar metadata files are skipped; an
/// unparseable candidate fails fast with the offending path in the message.
/// Traversal order is sorted by file name, so scan results are deterministic
/// across runs.
pub fn list_recipes(
    dir: &Path,
) -> impl Iterator<Item = Result<(PathBuf, Recipe), StoreError>> {
    let dir = dir.to_owned();
    WalkDir::new(&dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    return Some(Err(StoreError::Scan {
                        dir: dir.clone(),
                        source,
                    }));
                }
            };
            if !entry.file_type().is_file() {
                return None;
            }
            let path = entry.into_path();
            if paths::has_suffix(&path, SIDECAR_SUFFIX) {
                trace!(path = %path.display(), "Skipping sidecar metadata file");
                return None;
            }
            Some(load_recipe(&path).map(|recipe| (path, recipe)))
        })
}

/// Load and parse a single recipe file, picking the parser by extension.
/// Anything that isn't JSON is given to the YAML parser, which also accepts
/// JSON-ish inline syntax.
fn load_recipe(path: &Path) -> Result<Recipe, StoreError> {
    trace!(path = %path.display(), "Loading recipe file");
    let text = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_owned(),
        source,
    })?;
    let parsed = match paths::extension(path).as_deref() {
        Some("json") => Recipe::from_json(&text),
        _ => Recipe::from_yaml(&text),
    };
    parsed.map_err(|cause| StoreError::Parse {
        path: path.to_owned(),
        cause,
    })
}

/// The on-disk component store:
/// `<root>/recipes/<name>-<version>.yaml` plus
/// `<root>/artifacts/<name>/<version>/`
#[derive(Clone, Debug)]
pub struct FsComponentStore {
    root: PathBuf,
}

impl FsComponentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn recipe_path(&self, id: &ComponentIdentifier) -> PathBuf {
        self.root.join(RECIPES_DIR).join(format!(
            "{name}-{version}.yaml",
            name = id.name,
            version = id.version
        ))
    }
}

impl ComponentStore for FsComponentStore {
    fn save_package_recipe(
        &self,
        id: &ComponentIdentifier,
        serialized: &str,
    ) -> Result<(), StoreError> {
        let path = self.recipe_path(id);
        debug!(component = %id, path = %path.display(), "Persisting recipe");
        paths::create_parent(&path)
            .and_then(|()| fs::write(&path, serialized))
            .map_err(|source| StoreError::Write {
                id: id.clone(),
                source,
            })
    }

    fn load_package_recipe(
        &self,
        id: &ComponentIdentifier,
    ) -> Result<Option<Recipe>, StoreError> {
        let path = self.recipe_path(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        Recipe::from_yaml(&text)
            .map(Some)
            .map_err(|cause| StoreError::Parse { path, cause })
    }

    fn delete_component(
        &self,
        id: &ComponentIdentifier,
    ) -> Result<(), StoreError> {
        let path = self.recipe_path(id);
        debug!(component = %id, path = %path.display(), "Deleting recipe");
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Delete {
                id: id.clone(),
                source,
            }),
        }
    }

    fn artifact_directory_path(&self, id: &ComponentIdentifier) -> PathBuf {
        self.root
            .join(ARTIFACTS_DIR)
            .join(id.name.as_str())
            .join(id.version.to_string())
    }
}

/// An error from the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("error scanning recipe directory {}", .dir.display())]
    Scan {
        dir: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("error reading recipe file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error parsing recipe file {}: {cause:#}", .path.display())]
    Parse { path: PathBuf, cause: anyhow::Error },

    #[error("error writing recipe for `{id}`")]
    Write {
        id: ComponentIdentifier,
        #[source]
        source: io::Error,
    },

    #[error("error serializing recipe for `{id}`")]
    Serialize {
        id: ComponentIdentifier,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("error deleting recipe for `{id}`")]
    Delete {
        id: ComponentIdentifier,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use kiln_util::{Factory, TempDir, assert_err, temp_dir};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn write_recipe(dir: &Path, file: &str, name: &str, version: &str) {
        let path = dir.join(file);
        paths::create_parent(&path).unwrap();
        fs::write(
            path,
            format!(
                "ComponentName: {name}\nComponentVersion: \"{version}\"\n"
            ),
        )
        .unwrap();
    }

    /// Directories and sidecar files are skipped; nested recipes are found;
    /// order is deterministic
    #[rstest]
    fn test_list_recipes(temp_dir: TempDir) {
        write_recipe(&temp_dir, "b.yaml", "B", "1.0.0");
        write_recipe(&temp_dir, "nested/a.yml", "A", "1.0.0");
        write_recipe(&temp_dir, "c.json", "C", "1.0.0");
        fs::write(temp_dir.join("b.meta.json"), "{not a recipe}").unwrap();
        fs::create_dir(temp_dir.join("empty")).unwrap();

        let names = list_recipes(&temp_dir)
            .map_ok(|(_, recipe)| recipe.component_name.to_string())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(names, vec!["B", "C", "A"]);
    }

    /// An unparseable recipe fails fast, naming the offending file
    #[rstest]
    fn test_list_recipes_parse_error(temp_dir: TempDir) {
        write_recipe(&temp_dir, "ok.yaml", "A", "1.0.0");
        fs::write(temp_dir.join("zbroken.yaml"), "ComponentName: [oops")
            .unwrap();

        let results = list_recipes(&temp_dir).collect_vec();
        assert_eq!(results.len(), 2);
        assert_err!(
            results.into_iter().next_back().unwrap(),
            "zbroken.yaml"
        );
    }

    #[rstest]
    fn test_fs_store_round_trip(temp_dir: TempDir) {
        let store = FsComponentStore::new(&*temp_dir);
        let recipe = Recipe::factory(("LoggerA", "1.0.0"));
        let id = recipe.identifier();

        assert_eq!(store.load_package_recipe(&id).unwrap(), None);
        store
            .save_package_recipe(&id, &recipe.to_yaml().unwrap())
            .unwrap();
        assert_eq!(store.load_package_recipe(&id).unwrap(), Some(recipe));

        // Overwriting is idempotent
        let replacement = Recipe {
            component_description: Some("replaced".to_owned()),
            ..Recipe::factory(("LoggerA", "1.0.0"))
        };
        store
            .save_package_recipe(&id, &replacement.to_yaml().unwrap())
            .unwrap();
        assert_eq!(
            store.load_package_recipe(&id).unwrap(),
            Some(replacement)
        );

        store.delete_component(&id).unwrap();
        assert_eq!(store.load_package_recipe(&id).unwrap(), None);
        // Deleting again is fine
        store.delete_component(&id).unwrap();
    }

    /// Artifact paths are a pure function of identifier + store root
    #[rstest]
    fn test_artifact_directory_path(temp_dir: TempDir) {
        let store = FsComponentStore::new(&*temp_dir);
        let id = ComponentIdentifier::factory(("LoggerTemplate", "1.2.0"));
        assert_eq!(
            store.artifact_directory_path(&id),
            temp_dir.join("artifacts/LoggerTemplate/1.2.0")
        );
    }
}
