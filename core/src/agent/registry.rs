use crate::error::RegistryError;
use crate::traits::{Capability, CapabilityDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Descriptor and executable of one registered capability.
#[derive(Clone, Copy)]
pub struct CapabilityEntry<'a> {
    pub descriptor: &'a CapabilityDescriptor,
    pub executable: &'a Arc<dyn Capability>,
}

/// Append-only set of capabilities. Built once at startup, then shared
/// behind an `Arc` and only read.
#[derive(Default)]
pub struct CapabilityRegistry {
    descriptors: Vec<CapabilityDescriptor>,
    executables: Vec<Arc<dyn Capability>>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: impl Capability + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(capability))
    }

    pub fn register_arc(&mut self, capability: Arc<dyn Capability>) -> Result<(), RegistryError> {
        let descriptor = capability.descriptor();

        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateCapability(descriptor.name));
        }

        debug!(capability = %descriptor.name, "Registered capability");
        self.index
            .insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        self.executables.push(capability);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<CapabilityEntry<'_>, RegistryError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| RegistryError::UnknownCapability(name.to_string()))?;

        Ok(CapabilityEntry {
            descriptor: &self.descriptors[idx],
            executable: &self.executables[idx],
        })
    }

    /// Descriptors in registration order.
    pub fn manifest(&self) -> &[CapabilityDescriptor] {
        &self.descriptors
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::traits::{Arguments, ParamType, ParameterSpec};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;

    pub(crate) struct EchoCapability {
        name: String,
    }

    impl EchoCapability {
        pub(crate) fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl Capability for EchoCapability {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "Echo the arguments back"
        }

        fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
            BTreeMap::from([(
                "text".to_string(),
                ParameterSpec::required(ParamType::String, "Text to echo"),
            )])
        }

        async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
            Ok(json!({ "echo": args.get("text").cloned().unwrap_or(Value::Null) }))
        }
    }

    #[test]
    fn lookup_returns_registered_descriptor() {
        let mut registry = CapabilityRegistry::new();
        let capability = EchoCapability::new("echo");
        let expected = capability.descriptor();
        registry.register(capability).unwrap();

        let entry = registry.lookup("echo").unwrap();
        assert_eq!(entry.descriptor, &expected);
        assert_eq!(entry.executable.name(), "echo");
    }

    #[test]
    fn duplicate_leaves_registry_unchanged() {
        let mut registry = CapabilityRegistry::new();
        registry.register(EchoCapability::new("echo")).unwrap();
        registry.register(EchoCapability::new("other")).unwrap();

        let err = registry.register(EchoCapability::new("echo")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateCapability("echo".to_string()));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["echo", "other"]);
    }

    #[test]
    fn unknown_lookup_fails() {
        let registry = CapabilityRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.lookup("nope"),
            Err(RegistryError::UnknownCapability(name)) if name == "nope"
        ));
    }

    #[test]
    fn manifest_keeps_registration_order() {
        let mut registry = CapabilityRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(EchoCapability::new(name)).unwrap();
        }

        let names: Vec<_> = registry.manifest().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }
}
