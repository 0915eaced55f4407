// ── Field catalog ──
//
// Which fields exist on which circuit. The catalog is static for the
// lifetime of a `Gateway`; the State Store is built from it once.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::FieldDescriptor;

/// Static lookup of the fields a circuit provides.
pub trait FieldCatalog: Send + Sync {
    /// Every field of `circuit`, in a stable order. Unknown circuits yield
    /// an empty list.
    fn fields_for(&self, circuit: &str) -> Vec<Arc<FieldDescriptor>>;

    /// A single field by name.
    fn field(&self, circuit: &str, name: &str) -> Option<Arc<FieldDescriptor>> {
        self.fields_for(circuit)
            .into_iter()
            .find(|field| field.name == name)
    }
}

/// In-memory catalog, typically built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    circuits: HashMap<String, Vec<Arc<FieldDescriptor>>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `field` to `circuit`. A field with the same name replaces the
    /// earlier one in place.
    pub fn insert(&mut self, circuit: impl Into<String>, field: FieldDescriptor) {
        let fields = self.circuits.entry(circuit.into()).or_default();
        let field = Arc::new(field);
        match fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => fields.push(field),
        }
    }

    pub fn with_field(mut self, circuit: impl Into<String>, field: FieldDescriptor) -> Self {
        self.insert(circuit, field);
        self
    }

    pub fn circuits(&self) -> impl Iterator<Item = &str> {
        self.circuits.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.values().all(Vec::is_empty)
    }
}

impl FieldCatalog for StaticCatalog {
    fn fields_for(&self, circuit: &str) -> Vec<Arc<FieldDescriptor>> {
        self.circuits.get(circuit).cloned().unwrap_or_default()
    }

    fn field(&self, circuit: &str, name: &str) -> Option<Arc<FieldDescriptor>> {
        self.circuits
            .get(circuit)?
            .iter()
            .find(|f| f.name == name)
            .cloned()
    }
}
