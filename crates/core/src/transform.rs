//! The abstract shape a transformer plugin must satisfy, plus the
//! per-template initialization protocol. The plugin host produces values of
//! this trait; the expansion driver consumes them. Keeping the contract
//! separate from the Lua host means the driver (and its tests) never care
//! where a transformer came from.

use crate::{
    error::ExpansionError,
    recipe::Recipe,
    schema::{self, ParameterBag, ParameterSchema},
};
use tracing::debug;

/// A loaded transformer, bound to the template that shipped it
pub trait Transformer {
    /// The authoritative parameter schema baked into the transformer
    /// artifact
    fn declared_schema(&self) -> anyhow::Result<ParameterSchema>;

    /// The concrete record type `transform` expects to receive. An empty
    /// shape is fine for pure-substitution templates.
    fn parameter_shape(&self) -> anyhow::Result<ParameterShape>;

    /// Given a parameter file's recipe and the already-validated, merged
    /// parameter bag, produce a fully-specified component recipe
    fn transform(
        &self,
        param_recipe: &Recipe,
        params: &ParameterBag,
    ) -> anyhow::Result<Recipe>;
}

/// Descriptor of the record a transformer's `transform` consumes: the field
/// names it will read from the parameter bag
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterShape(Vec<String>);

impl ParameterShape {
    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Which of this shape's fields are absent from the given parameter bag?
    pub fn missing_from(&self, params: &ParameterBag) -> Vec<String> {
        self.0
            .iter()
            .filter(|field| !params.contains_key(*field))
            .cloned()
            .collect()
    }
}

impl FromIterator<String> for ParameterShape {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Run the initialization protocol for a freshly loaded transformer:
/// validate the schema it declares, then check that schema against the one
/// embedded in its template's recipe. Either failure aborts initialization
/// for the template (and with it, the batch). Returns the validated schema.
pub fn initialize_transformer(
    transformer: &dyn Transformer,
    template: &Recipe,
) -> Result<ParameterSchema, ExpansionError> {
    let template_id = template.identifier();
    let declared = transformer.declared_schema().map_err(|cause| {
        ExpansionError::SchemaUnavailable {
            template: template_id.clone(),
            cause,
        }
    })?;
    declared
        .validate()
        .map_err(|violations| ExpansionError::TemplateAuthoring {
            template: template_id.clone(),
            violations,
        })?;

    // A template with no schema field is treated as declaring the empty
    // schema, so a transformer that declares fields still mismatches
    let recipe_schema = template.parameter_schema.clone().unwrap_or_default();
    let differences = schema::compare_schemas(&declared, &recipe_schema);
    if !differences.is_empty() {
        return Err(ExpansionError::SchemaMismatch {
            template: template_id,
            differences,
        });
    }

    debug!(
        template = %template_id,
        fields = declared.len(),
        "Initialized transformer"
    );
    Ok(declared)
}
