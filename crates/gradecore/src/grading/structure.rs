use std::collections::{BTreeMap, HashMap, HashSet};

use super::domain::{
    ClassId, ClassStructure, ConstituentDef, ConstituentId, ItemDef, ItemId, ModuleDef, ModuleId,
};

/// Tolerance for the 100% weight-sum invariant; weights are authored as
/// decimals and accumulate float error.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Structural violations reported at validation time. The engine refuses to
/// compute against a structure carrying any of these.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StructuralError {
    #[error("non-extra module weights for class {class_id:?} sum to {found}, expected 100")]
    ModuleWeightSum { class_id: ClassId, found: f64 },
    #[error("non-extra constituent weights for module {module_id:?} sum to {found}, expected 100")]
    ConstituentWeightSum { module_id: ModuleId, found: f64 },
    #[error("constituent {constituent_id:?} references unknown module {module_id:?}")]
    UnknownModule {
        constituent_id: ConstituentId,
        module_id: ModuleId,
    },
    #[error("item {item_id:?} references unknown constituent {constituent_id:?}")]
    UnknownConstituent {
        item_id: ItemId,
        constituent_id: ConstituentId,
    },
    #[error("duplicate identifier {id} in class structure")]
    DuplicateId { id: String },
    #[error("policy {name} v{version} referenced by a binding is not registered")]
    UnknownPolicy { name: String, version: u32 },
}

/// A class structure that passed validation, with lookup maps the compute
/// pipeline needs. Constructing one is the only way the engine accepts a
/// structure, mirroring the authored data without mutating it.
#[derive(Debug, Clone)]
pub struct ValidatedStructure {
    structure: ClassStructure,
    constituents_by_module: BTreeMap<ModuleId, Vec<usize>>,
    items_by_constituent: BTreeMap<ConstituentId, Vec<usize>>,
    module_of_constituent: HashMap<ConstituentId, ModuleId>,
    constituent_of_item: HashMap<ItemId, ConstituentId>,
}

impl ValidatedStructure {
    pub fn new(structure: ClassStructure) -> Result<Self, StructuralError> {
        check_unique_ids(&structure)?;
        check_module_weights(&structure)?;

        let mut constituents_by_module: BTreeMap<ModuleId, Vec<usize>> = BTreeMap::new();
        let mut module_of_constituent = HashMap::new();
        let module_ids: HashSet<&ModuleId> =
            structure.modules.iter().map(|module| &module.id).collect();

        for (index, constituent) in structure.constituents.iter().enumerate() {
            if !module_ids.contains(&constituent.module_id) {
                return Err(StructuralError::UnknownModule {
                    constituent_id: constituent.id.clone(),
                    module_id: constituent.module_id.clone(),
                });
            }
            constituents_by_module
                .entry(constituent.module_id.clone())
                .or_default()
                .push(index);
            module_of_constituent.insert(constituent.id.clone(), constituent.module_id.clone());
        }

        for module in &structure.modules {
            check_constituent_weights(module, &structure, &constituents_by_module)?;
        }

        let mut items_by_constituent: BTreeMap<ConstituentId, Vec<usize>> = BTreeMap::new();
        let mut constituent_of_item = HashMap::new();
        for (index, item) in structure.items.iter().enumerate() {
            if !module_of_constituent.contains_key(&item.constituent_id) {
                return Err(StructuralError::UnknownConstituent {
                    item_id: item.id.clone(),
                    constituent_id: item.constituent_id.clone(),
                });
            }
            items_by_constituent
                .entry(item.constituent_id.clone())
                .or_default()
                .push(index);
            constituent_of_item.insert(item.id.clone(), item.constituent_id.clone());
        }

        Ok(Self {
            structure,
            constituents_by_module,
            items_by_constituent,
            module_of_constituent,
            constituent_of_item,
        })
    }

    pub fn class_id(&self) -> &ClassId {
        &self.structure.class_id
    }

    pub fn modules(&self) -> &[ModuleDef] {
        &self.structure.modules
    }

    pub fn module(&self, module_id: &ModuleId) -> Option<&ModuleDef> {
        self.structure
            .modules
            .iter()
            .find(|module| &module.id == module_id)
    }

    pub fn constituents_of(&self, module_id: &ModuleId) -> Vec<&ConstituentDef> {
        self.constituents_by_module
            .get(module_id)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&index| &self.structure.constituents[index])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn items_of(&self, constituent_id: &ConstituentId) -> Vec<&ItemDef> {
        self.items_by_constituent
            .get(constituent_id)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&index| &self.structure.items[index])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn module_of_constituent(&self, constituent_id: &ConstituentId) -> Option<&ModuleId> {
        self.module_of_constituent.get(constituent_id)
    }

    pub fn module_of_item(&self, item_id: &ItemId) -> Option<&ModuleId> {
        self.constituent_of_item
            .get(item_id)
            .and_then(|constituent_id| self.module_of_constituent.get(constituent_id))
    }

    pub fn contains_item(&self, item_id: &ItemId) -> bool {
        self.constituent_of_item.contains_key(item_id)
    }
}

fn check_unique_ids(structure: &ClassStructure) -> Result<(), StructuralError> {
    let mut seen = HashSet::new();
    let module_ids = structure.modules.iter().map(|module| module.id.0.as_str());
    let constituent_ids = structure
        .constituents
        .iter()
        .map(|constituent| constituent.id.0.as_str());
    let item_ids = structure.items.iter().map(|item| item.id.0.as_str());

    for id in module_ids.chain(constituent_ids).chain(item_ids) {
        if !seen.insert(id) {
            return Err(StructuralError::DuplicateId { id: id.to_string() });
        }
    }
    Ok(())
}

fn check_module_weights(structure: &ClassStructure) -> Result<(), StructuralError> {
    let sum: f64 = structure
        .modules
        .iter()
        .filter(|module| !module.is_extra)
        .map(|module| module.weight_pct)
        .sum();

    if (sum - 100.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(StructuralError::ModuleWeightSum {
            class_id: structure.class_id.clone(),
            found: sum,
        });
    }
    Ok(())
}

fn check_constituent_weights(
    module: &ModuleDef,
    structure: &ClassStructure,
    constituents_by_module: &BTreeMap<ModuleId, Vec<usize>>,
) -> Result<(), StructuralError> {
    let Some(indices) = constituents_by_module.get(&module.id) else {
        return Ok(());
    };

    let sum: f64 = indices
        .iter()
        .map(|&index| &structure.constituents[index])
        .filter(|constituent| !constituent.is_extra)
        .map(|constituent| constituent.weight_pct)
        .sum();

    if (sum - 100.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(StructuralError::ConstituentWeightSum {
            module_id: module.id.clone(),
            found: sum,
        });
    }
    Ok(())
}
