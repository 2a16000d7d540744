use crate::schema::Assertion;
use std::collections::HashMap;

/// Flattens an accepted assertion's AttributeStatements into a name -> values
/// map for downstream consumers. Unnamed attributes are skipped.
pub fn extract_attributes(assertion: &Assertion) -> HashMap<String, Vec<String>> {
    let mut attrs: HashMap<String, Vec<String>> = HashMap::new();
    for attribute in &assertion.attributes {
        let Some(name) = &attribute.name else { continue };
        attrs
            .entry(name.clone())
            .or_default()
            .extend(attribute.values.iter().cloned());
    }
    attrs
}
