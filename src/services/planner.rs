use serde::Serialize;

use crate::services::catalog::{Catalog, MigrationUnit};
use crate::services::prober::Classification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    /// Every catalog unit, tracked in the history table.
    Full,
    /// The legacy-safe subsequence, untracked.
    Legacy,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub kind: PlanKind,
    pub units: Vec<&'static MigrationUnit>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.units.iter().map(|u| u.id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Planner {
    catalog: Catalog,
}

impl Planner {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> Catalog {
        self.catalog
    }

    pub fn plan(&self, classification: Classification) -> Plan {
        match classification {
            Classification::Fresh | Classification::Managed => Plan {
                kind: PlanKind::Full,
                units: self.catalog.units().iter().collect(),
            },
            Classification::Legacy => self.fallback(),
        }
    }

    /// The plan run after a failed primary plan.
    pub fn fallback(&self) -> Plan {
        Plan {
            kind: PlanKind::Legacy,
            units: self.catalog.legacy_units().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::ANCHOR_TABLES;

    #[test]
    fn fresh_and_managed_get_the_whole_catalog() {
        let planner = Planner::default();
        for c in [Classification::Fresh, Classification::Managed] {
            let plan = planner.plan(c);
            assert_eq!(plan.kind, PlanKind::Full);
            assert_eq!(plan.len(), planner.catalog().len());
        }
    }

    #[test]
    fn legacy_plan_is_an_ordered_subsequence() {
        let planner = Planner::default();
        let full: Vec<&str> = planner.plan(Classification::Fresh).ids().collect();
        let legacy: Vec<&str> = planner.plan(Classification::Legacy).ids().collect();
        assert!(legacy.len() < full.len());

        let mut rest = full.iter();
        for id in &legacy {
            assert!(rest.any(|f| f == id), "{id} out of order");
        }
    }

    #[test]
    fn legacy_plan_never_recreates_anchors_or_renames() {
        let plan = Planner::default().fallback();
        for unit in &plan.units {
            assert!(unit.created_tables().all(|t| !ANCHOR_TABLES.contains(&t)), "{}", unit.id);
            assert!(unit.up.iter().all(|op| !op.is_destructive()), "{}", unit.id);
        }
    }
}
