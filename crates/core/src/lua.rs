//! Host for transformer plugins. Each template's transformer is a Luau
//! script (`transformer.lua` inside the template's artifact directory)
//! loaded into its own fresh, sandboxed VM. The VM is the plugin scope:
//! nothing is shared between templates, so two transformers that ship
//! classes with the same name never meet. The only symbol the host injects
//! into a plugin scope is the transformer contract itself.
//!
//! A transformer script declares its class through the contract:
//!
//! ```lua
//! LoggerTransformer = Transformer:extend("LoggerTransformer")
//!
//! function LoggerTransformer:declared_schema()
//!     return { message = { type = "string", required = true } }
//! end
//!
//! function LoggerTransformer:transform(recipe, params)
//!     return { --[[ a full component recipe ]] }
//! end
//! ```
//!
//! Exactly one class must be declared per artifact. `parameter_shape` is
//! optional; `new` has a default and may be overridden for transformers
//! that carry state.

use crate::{
    recipe::Recipe,
    schema::{ParameterBag, ParameterSchema},
    transform::{ParameterShape, Transformer},
};
use anyhow::Context;
use itertools::Itertools;
use mlua::{
    Function, Lua, LuaSerdeExt, ObjectLike, SerializeOptions, Table,
    Value as LuaValue,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Class field holding the name passed to `Transformer:extend`
const CLASS_NAME_FIELD: &str = "__name";

/// The transformer contract, installed into every plugin scope before the
/// plugin script runs. `extend` records each declared class in the host's
/// class table (received as the chunk argument and reachable only through
/// the host), which is what discovery scans after the script executes.
const TRANSFORMER_CONTRACT: &str = r#"
local classes = ...

Transformer = {}

function Transformer:extend(name)
    local class = setmetatable({}, {__index = self})
    class.__name = name
    class.__index = class
    function class.new()
        return setmetatable({}, class)
    end
    table.insert(classes, class)
    return class
end
"#;

/// Keep absent optional fields absent instead of inserting nulls, so plugin
/// code sees idiomatic nil for missing recipe fields
const SERIALIZE_OPTIONS: SerializeOptions = SerializeOptions::new()
    .serialize_none_to_null(false)
    .serialize_unit_to_null(false);

/// Loads transformer artifacts into isolated plugin scopes. The host itself
/// is stateless; every [load](Self::load) produces an independent VM whose
/// lifetime is tied to the returned transformer, so a single process can
/// load any number of disjoint plugin scopes without leaking earlier ones.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransformerHost;

impl TransformerHost {
    pub fn new() -> Self {
        Self
    }

    /// Load the transformer shipped at `artifact_path` and bind it to its
    /// declaring template. Runs discovery (exactly one declared class) and
    /// instantiation, but *not* the schema initialization protocol; that's
    /// the driver's job.
    pub fn load(
        &self,
        artifact_path: &Path,
        template: &Recipe,
    ) -> Result<LuaTransformer, PluginError> {
        if !artifact_path.is_file() {
            return Err(PluginError::ArtifactNotFound {
                path: artifact_path.to_owned(),
            });
        }
        debug!(
            template = %template.identifier(),
            path = %artifact_path.display(),
            "Loading transformer artifact"
        );
        let load_error = |source| PluginError::Load {
            path: artifact_path.to_owned(),
            source,
        };

        let vm = Lua::new();
        // The contract is registered against the real globals, then the VM
        // is sandboxed so the plugin script can't alter the contract or the
        // standard library, only read them
        let setup = || -> mlua::Result<Table> {
            let classes = vm.create_table()?;
            vm.load(TRANSFORMER_CONTRACT)
                .set_name("=[transformer contract]")
                .call::<()>(&classes)?;
            vm.sandbox(true)?;
            Ok(classes)
        };
        let classes = setup().map_err(load_error)?;

        vm.load(artifact_path).exec().map_err(load_error)?;

        let candidates: Vec<Table> = classes
            .sequence_values()
            .collect::<mlua::Result<_>>()
            .map_err(load_error)?;
        let class = match candidates.as_slice() {
            [] => {
                return Err(PluginError::NoCandidate {
                    path: artifact_path.to_owned(),
                });
            }
            [class] => class.clone(),
            _ => {
                return Err(PluginError::MultipleCandidates {
                    path: artifact_path.to_owned(),
                    names: candidates.iter().map(class_name).collect(),
                });
            }
        };
        let name = class_name(&class);
        trace!(transformer = name, "Discovered transformer class");

        let instantiate = || -> mlua::Result<Table> {
            let new: Function = class.get("new")?;
            new.call(())
        };
        let instance =
            instantiate().map_err(|source| PluginError::Instantiate {
                name: name.clone(),
                source,
            })?;

        Ok(LuaTransformer { vm, instance, name })
    }
}

/// Get the name a class was declared with, for error messages
fn class_name(class: &Table) -> String {
    class
        .raw_get::<String>(CLASS_NAME_FIELD)
        .unwrap_or_else(|_| "<unnamed>".to_owned())
}

/// A transformer instance bound to its own plugin scope. Dropping the
/// transformer releases the scope.
pub struct LuaTransformer {
    vm: Lua,
    instance: Table,
    name: String,
}

impl LuaTransformer {
    /// The name the transformer class was declared with
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LuaTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaTransformer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Transformer for LuaTransformer {
    fn declared_schema(&self) -> anyhow::Result<ParameterSchema> {
        let value: LuaValue =
            self.instance.call_method("declared_schema", ())?;
        if is_empty_table(&value) {
            return Ok(ParameterSchema::default());
        }
        self.vm
            .from_value(value)
            .context("deserializing declared parameter schema")
    }

    fn parameter_shape(&self) -> anyhow::Result<ParameterShape> {
        // The method is optional; an absent or empty shape means the
        // transformer consumes a record of nothing
        let method: LuaValue = self.instance.get("parameter_shape")?;
        if method.is_nil() {
            return Ok(ParameterShape::default());
        }
        let value: LuaValue =
            self.instance.call_method("parameter_shape", ())?;
        if value.is_nil() || is_empty_table(&value) {
            return Ok(ParameterShape::default());
        }
        let fields: Vec<String> = self
            .vm
            .from_value(value)
            .context("deserializing parameter shape")?;
        Ok(fields.into_iter().collect())
    }

    fn transform(
        &self,
        param_recipe: &Recipe,
        params: &ParameterBag,
    ) -> anyhow::Result<Recipe> {
        let recipe_value =
            self.vm.to_value_with(param_recipe, SERIALIZE_OPTIONS)?;
        let params_value = self.vm.to_value_with(params, SERIALIZE_OPTIONS)?;
        let produced: LuaValue = self
            .instance
            .call_method("transform", (recipe_value, params_value))?;
        self.vm
            .from_value(produced)
            .context("deserializing recipe returned by transformer")
    }
}

/// Is this value a table with nothing in it? Empty tables are ambiguous
/// between maps and sequences, so callers treat them as their own empty
/// value instead of deserializing.
fn is_empty_table(value: &LuaValue) -> bool {
    match value {
        LuaValue::Table(table) => table.is_empty(),
        _ => false,
    }
}

/// An error from loading a transformer artifact into a plugin scope
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("transformer artifact not found: {}", .path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("error loading transformer artifact {}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: mlua::Error,
    },

    /// The script declared no transformer class
    #[error("no candidate transformer in artifact {}", .path.display())]
    NoCandidate { path: PathBuf },

    /// The script declared more than one transformer class
    #[error(
        "multiple candidate transformers in artifact {}: {}",
        .path.display(),
        .names.iter().format(", ")
    )]
    MultipleCandidates { path: PathBuf, names: Vec<String> },

    #[error("could not instantiate transformer `{name}`")]
    Instantiate {
        name: String,
        #[source]
        source: mlua::Error,
    },
}
