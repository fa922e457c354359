//! Parameter schema model and the engine that validates, compares, and
//! merges schemas. Templates declare a schema twice: once baked into the
//! transformer artifact and once mirrored in the template recipe. The engine
//! checks both sides against the per-field invariants and against each
//! other, then merges caller-supplied parameter values with declared
//! defaults.
//!
//! Everything here aggregates violations instead of failing on the first
//! one, so template authors see the full list in one pass instead of playing
//! whack-a-mole.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};

/// The merged, validated parameter values handed to a transformer. Field
/// order follows the declared schema.
pub type ParameterBag = IndexMap<String, Value>;

/// A template's parameter schema: an ordered mapping from field name to the
/// field's type, requiredness, and default
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSchema(IndexMap<String, ParameterField>);

impl ParameterSchema {
    /// Get the declaration of one field
    pub fn get(&self, field: &str) -> Option<&ParameterField> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterField)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the per-field invariants: a required field must not declare a
    /// default, an optional field must declare a default, and a declared
    /// default must be of the declared type. *Every* violation is reported.
    pub fn validate(&self) -> Result<(), Vec<SchemaViolation>> {
        let mut violations = Vec::new();
        for (name, field) in &self.0 {
            match (&field.default_value, field.required) {
                (Some(_), true) => {
                    violations.push(SchemaViolation::RequiredWithDefault {
                        field: name.clone(),
                    });
                }
                (None, false) => {
                    violations.push(SchemaViolation::OptionalWithoutDefault {
                        field: name.clone(),
                    });
                }
                (Some(default), false) => {
                    if !field.field_type.matches(default) {
                        violations.push(SchemaViolation::DefaultTypeMismatch {
                            field: name.clone(),
                            declared: field.field_type,
                            actual: value_type(default),
                        });
                    }
                }
                (None, true) => {}
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

impl FromIterator<(String, ParameterField)> for ParameterSchema {
    fn from_iter<I: IntoIterator<Item = (String, ParameterField)>>(
        iter: I,
    ) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Declaration of a single schema field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterField {
    #[serde(rename = "type")]
    pub field_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(
        rename = "defaultValue",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_value: Option<Value>,
}

impl Display for ParameterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type={}", self.field_type)?;
        if self.required {
            write!(f, ", required")?;
        }
        if let Some(default) = &self.default_value {
            write!(f, ", default={default}")?;
        }
        Ok(())
    }
}

/// The type a schema field declares for its values
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Object,
    Array,
    Boolean,
}

impl ParameterType {
    /// Does the runtime type of the given value equal this declared type?
    pub fn matches(&self, value: &Value) -> bool {
        value_type(value) == ValueType::from(*self)
    }
}

/// The runtime type of a dynamic value. This is [ParameterType] plus `null`,
/// which a value can be but a schema field cannot declare.
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Object,
    Array,
    Boolean,
    Null,
}

impl From<ParameterType> for ValueType {
    fn from(parameter_type: ParameterType) -> Self {
        match parameter_type {
            ParameterType::String => Self::String,
            ParameterType::Number => Self::Number,
            ParameterType::Object => Self::Object,
            ParameterType::Array => Self::Array,
            ParameterType::Boolean => Self::Boolean,
        }
    }
}

/// Map a dynamic value to its runtime type. Integral and floating values are
/// both `number`.
pub fn value_type(value: &Value) -> ValueType {
    match value {
        Value::Null => ValueType::Null,
        Value::Bool(_) => ValueType::Boolean,
        Value::Number(_) => ValueType::Number,
        Value::String(_) => ValueType::String,
        Value::Array(_) => ValueType::Array,
        Value::Object(_) => ValueType::Object,
    }
}

/// Compare the schema emitted by a transformer artifact against the schema
/// embedded in the template's recipe. Returns every difference: fields the
/// recipe is missing, fields it adds, and fields whose
/// `(type, required, defaultValue)` tuple differs. An empty result means the
/// schemas are equal.
pub fn compare_schemas(
    from_artifact: &ParameterSchema,
    from_recipe: &ParameterSchema,
) -> Vec<SchemaDiff> {
    let mut differences = Vec::new();
    for (name, artifact_field) in from_artifact.iter() {
        match from_recipe.get(name) {
            None => differences.push(SchemaDiff::MissingFromRecipe {
                field: name.clone(),
            }),
            Some(recipe_field) if recipe_field != artifact_field => {
                differences.push(SchemaDiff::Differs {
                    field: name.clone(),
                    artifact: artifact_field.clone(),
                    recipe: recipe_field.clone(),
                });
            }
            Some(_) => {}
        }
    }
    for (name, _) in from_recipe.iter() {
        if from_artifact.get(name).is_none() {
            differences.push(SchemaDiff::NotDeclared {
                field: name.clone(),
            });
        }
    }
    differences
}

/// Merge caller-supplied values with a schema's declared defaults. For each
/// schema field: a caller value of the declared type wins; otherwise an
/// optional field falls back to its default; otherwise the field is recorded
/// as missing. Caller keys that the schema doesn't declare, and caller
/// values of the wrong runtime type, are violations too. Keys match
/// case-sensitively. All violations aggregate.
pub fn merge(
    schema: &ParameterSchema,
    caller_values: &IndexMap<String, Value>,
) -> Result<ParameterBag, Vec<MergeViolation>> {
    let mut violations = Vec::new();
    let mut merged = ParameterBag::new();
    for (name, field) in schema.iter() {
        match caller_values.get(name) {
            Some(value) if field.field_type.matches(value) => {
                merged.insert(name.clone(), value.clone());
            }
            Some(value) => violations.push(MergeViolation::TypeMismatch {
                field: name.clone(),
                declared: field.field_type,
                actual: value_type(value),
            }),
            None => match &field.default_value {
                Some(default) if !field.required => {
                    merged.insert(name.clone(), default.clone());
                }
                _ => violations.push(MergeViolation::MissingRequired {
                    field: name.clone(),
                }),
            },
        }
    }
    for key in caller_values.keys() {
        if schema.get(key).is_none() {
            violations.push(MergeViolation::Unknown { key: key.clone() });
        }
    }
    if violations.is_empty() {
        Ok(merged)
    } else {
        Err(violations)
    }
}

/// One way a declared schema can break the per-field invariants
#[derive(Clone, Debug, PartialEq, derive_more::Display)]
pub enum SchemaViolation {
    #[display("required field `{field}` must not declare a default value")]
    RequiredWithDefault { field: String },
    #[display("optional field `{field}` must declare a default value")]
    OptionalWithoutDefault { field: String },
    #[display(
        "default value for field `{field}` is {actual}, expected {declared}"
    )]
    DefaultTypeMismatch {
        field: String,
        declared: ParameterType,
        actual: ValueType,
    },
}

/// One difference between a transformer's declared schema and the schema in
/// its template recipe
#[derive(Clone, Debug, PartialEq, derive_more::Display)]
pub enum SchemaDiff {
    #[display(
        "field `{field}` is declared by the transformer but missing from \
        the recipe"
    )]
    MissingFromRecipe { field: String },
    #[display(
        "field `{field}` appears in the recipe but is not declared by the \
        transformer"
    )]
    NotDeclared { field: String },
    #[display(
        "field `{field}` differs: transformer declares ({artifact}), recipe \
        declares ({recipe})"
    )]
    Differs {
        field: String,
        artifact: ParameterField,
        recipe: ParameterField,
    },
}

/// One way caller-supplied parameter values can fail to merge with a schema
#[derive(Clone, Debug, PartialEq, derive_more::Display)]
pub enum MergeViolation {
    #[display("missing required parameter `{field}`")]
    MissingRequired { field: String },
    #[display("parameter `{field}` is {actual}, expected {declared}")]
    TypeMismatch {
        field: String,
        declared: ParameterType,
        actual: ValueType,
    },
    #[display("unknown parameter `{key}` is not declared by the schema")]
    Unknown { key: String },
}
