//! Phase registry: phase id to handler, iterated in ordinal order.

use std::collections::BTreeMap;

use super::Phase;
use crate::error::{Result, WardenError};

#[derive(Default)]
pub struct PhaseRegistry {
    phases: BTreeMap<u32, Box<dyn Phase>>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a phase. Ids and ordinals must both be unique.
    pub fn register(&mut self, phase: Box<dyn Phase>) -> Result<()> {
        if let Some(existing) = self.phases.get(&phase.ordinal()) {
            return Err(WardenError::Config(format!(
                "phase '{}' reuses ordinal {} of '{}'",
                phase.id(),
                phase.ordinal(),
                existing.id()
            )));
        }
        if self.get(phase.id()).is_some() {
            return Err(WardenError::Config(format!(
                "phase '{}' registered twice",
                phase.id()
            )));
        }
        self.phases.insert(phase.ordinal(), phase);
        Ok(())
    }

    pub fn with(mut self, phase: Box<dyn Phase>) -> Result<Self> {
        self.register(phase)?;
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&dyn Phase> {
        self.phases
            .values()
            .find(|p| p.id() == id)
            .map(|p| p.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Phase> {
        self.phases.values().map(|p| p.as_ref())
    }

    pub fn ids(&self) -> Vec<String> {
        self.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Required phase ids that are not registered
    pub fn missing(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|id| self.get(id).is_none())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{PhaseContext, PhaseOutcome};

    struct Named(&'static str, u32);

    impl Phase for Named {
        fn id(&self) -> &str {
            self.0
        }
        fn ordinal(&self) -> u32 {
            self.1
        }
        fn description(&self) -> &str {
            "test phase"
        }
        fn run(&self, _ctx: &PhaseContext) -> PhaseOutcome {
            PhaseOutcome::Completed(String::new())
        }
    }

    #[test]
    fn test_ordered_by_ordinal() {
        let registry = PhaseRegistry::new()
            .with(Box::new(Named("c", 30)))
            .unwrap()
            .with(Box::new(Named("a", 10)))
            .unwrap()
            .with(Box::new(Named("b", 20)))
            .unwrap();
        assert_eq!(registry.ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut registry = PhaseRegistry::new();
        registry.register(Box::new(Named("a", 10))).unwrap();
        assert!(registry.register(Box::new(Named("a", 20))).is_err());
        assert!(registry.register(Box::new(Named("b", 10))).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_required() {
        let registry = PhaseRegistry::new().with(Box::new(Named("a", 10))).unwrap();
        let missing = registry.missing(&["a".to_string(), "firewall".to_string()]);
        assert_eq!(missing, vec!["firewall"]);
    }
}
