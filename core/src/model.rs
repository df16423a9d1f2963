use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionBehavior {
    Required,
    #[default]
    Supported,
    NotSupported,
}

/// How a data store surfaces an uncommitted-write-then-read conflict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    StaleRead,
    PotentialDeadlock,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionPropagation {
    #[default]
    None,
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseCase {
    pub name: String,
    pub component: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCandidate {
    pub name: String,
    pub component: String,

    #[serde(default)]
    pub transaction_behavior: TransactionBehavior,

    #[serde(default)]
    pub asynchronous: bool,
}

impl ServiceCandidate {
    pub fn new(name: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component: component.into(),
            transaction_behavior: TransactionBehavior::default(),
            asynchronous: false,
        }
    }

    pub fn with_behavior(mut self, behavior: TransactionBehavior) -> Self {
        self.transaction_behavior = behavior;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStore {
    pub name: String,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub data_store: String,

    /// Component that owns the data; accesses from elsewhere are cross-component
    #[serde(default)]
    pub component: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: String,
    pub target: String,

    #[serde(default)]
    pub locality: Locality,

    #[serde(default)]
    pub latency: u64,

    #[serde(default)]
    pub propagation: TransactionPropagation,
}

impl Connection {
    pub fn local(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            locality: Locality::Local,
            latency: 0,
            propagation: TransactionPropagation::Propagate,
        }
    }

    pub fn remote(source: impl Into<String>, target: impl Into<String>, latency: u64) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            locality: Locality::Remote,
            latency,
            propagation: TransactionPropagation::None,
        }
    }

    pub fn with_propagation(mut self, propagation: TransactionPropagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn is_remote(&self) -> bool {
        self.locality == Locality::Remote
    }

    fn key(&self) -> (String, String) {
        (self.source.clone(), self.target.clone())
    }
}

/// A single change applied on top of a base model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Modification {
    MoveServiceCandidate {
        candidate: String,
        component: String,
    },
    MoveUseCase {
        use_case: String,
        component: String,
    },
    SetTransactionBehavior {
        candidate: String,
        behavior: TransactionBehavior,
    },
    SetAsynchronous {
        candidate: String,
        asynchronous: bool,
    },
    SetConnection {
        connection: Connection,
    },
    RemoveConnection {
        source: String,
        target: String,
    },
    SetEntityOwner {
        entity_type: String,
        component: Option<String>,
    },
    SetConflictPolicy {
        data_store: String,
        policy: ConflictPolicy,
    },
}

/// Serializable form of a model, e.g. loaded from a TOML document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDocument {
    #[serde(default)]
    pub components: Vec<String>,

    #[serde(default)]
    pub use_cases: Vec<UseCase>,

    #[serde(default)]
    pub service_candidates: Vec<ServiceCandidate>,

    #[serde(default)]
    pub data_stores: Vec<DataStore>,

    #[serde(default)]
    pub entity_types: Vec<EntityType>,

    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Which component owns each use case, service candidate and entity type, and
/// how components are connected.
///
/// Immutable once built. Every mapping sits behind its own `Arc`, so cloning is
/// cheap and [`apply_modifications`](Self::apply_modifications) copies only the
/// mappings a modification touches.
#[derive(Debug, Clone, Default)]
pub struct DeploymentModel {
    components: Arc<BTreeSet<String>>,
    use_cases: Arc<HashMap<String, UseCase>>,
    service_candidates: Arc<HashMap<String, ServiceCandidate>>,
    data_stores: Arc<HashMap<String, DataStore>>,
    entity_types: Arc<HashMap<String, EntityType>>,
    connections: Arc<HashMap<(String, String), Connection>>,
}

impl DeploymentModel {
    pub fn builder() -> DeploymentModelBuilder {
        DeploymentModelBuilder::default()
    }

    pub fn from_document(document: ModelDocument) -> Result<Self, ModelError> {
        let mut builder = Self::builder();
        for component in document.components {
            builder = builder.component(component);
        }
        for use_case in document.use_cases {
            builder = builder.use_case(use_case.name, use_case.component);
        }
        for candidate in document.service_candidates {
            builder = builder.service_candidate(candidate);
        }
        for store in document.data_stores {
            builder = builder.data_store(store.name, store.conflict_policy);
        }
        for entity_type in document.entity_types {
            builder = builder.entity_type(
                entity_type.name,
                entity_type.data_store,
                entity_type.component,
            );
        }
        for connection in document.connections {
            builder = builder.connection(connection);
        }
        builder.build()
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ModelError> {
        let document: ModelDocument =
            toml::from_str(s).map_err(|e| ModelError::Document(e.to_string()))?;
        Self::from_document(document)
    }

    /// Load a model document from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read model file {:?}", path.as_ref()))?;
        let model = Self::from_toml_str(&contents).context("Failed to parse model file")?;
        Ok(model)
    }

    pub fn to_document(&self) -> ModelDocument {
        let mut use_cases: Vec<_> = self.use_cases.values().cloned().collect();
        use_cases.sort_by(|a, b| a.name.cmp(&b.name));
        let mut service_candidates: Vec<_> = self.service_candidates.values().cloned().collect();
        service_candidates.sort_by(|a, b| a.name.cmp(&b.name));
        let mut data_stores: Vec<_> = self.data_stores.values().cloned().collect();
        data_stores.sort_by(|a, b| a.name.cmp(&b.name));
        let mut entity_types: Vec<_> = self.entity_types.values().cloned().collect();
        entity_types.sort_by(|a, b| a.name.cmp(&b.name));
        let mut connections: Vec<_> = self.connections.values().cloned().collect();
        connections.sort_by_key(|c| c.key());

        ModelDocument {
            components: self.components.iter().cloned().collect(),
            use_cases,
            service_candidates,
            data_stores,
            entity_types,
            connections,
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    pub fn has_component(&self, component: &str) -> bool {
        self.components.contains(component)
    }

    pub fn use_case_component(&self, use_case: &str) -> Option<&str> {
        self.use_cases.get(use_case).map(|u| u.component.as_str())
    }

    pub fn service_candidate(&self, candidate: &str) -> Option<&ServiceCandidate> {
        self.service_candidates.get(candidate)
    }

    pub fn entity_type(&self, entity_type: &str) -> Option<&EntityType> {
        self.entity_types.get(entity_type)
    }

    pub fn data_store(&self, data_store: &str) -> Option<&DataStore> {
        self.data_stores.get(data_store)
    }

    /// Conflict policy of the data store holding the given entity type
    pub fn conflict_policy(&self, entity_type: &str) -> Option<ConflictPolicy> {
        let entity_type = self.entity_types.get(entity_type)?;
        self.data_stores
            .get(&entity_type.data_store)
            .map(|store| store.conflict_policy)
    }

    pub fn connection(&self, source: &str, target: &str) -> Option<&Connection> {
        self.connections
            .get(&(source.to_string(), target.to_string()))
    }

    /// Build a new model from this one. Mappings that no modification touches
    /// are shared with `self`.
    pub fn apply_modifications(&self, modifications: &[Modification]) -> Result<Self, ModelError> {
        let mut model = self.clone();
        for modification in modifications {
            model.apply(modification)?;
        }
        Ok(model)
    }

    fn apply(&mut self, modification: &Modification) -> Result<(), ModelError> {
        match modification {
            Modification::MoveServiceCandidate {
                candidate,
                component,
            } => {
                self.require_component(component)?;
                let entry = Arc::make_mut(&mut self.service_candidates)
                    .get_mut(candidate)
                    .ok_or_else(|| ModelError::UnknownServiceCandidate(candidate.clone()))?;
                entry.component = component.clone();
            }
            Modification::MoveUseCase {
                use_case,
                component,
            } => {
                self.require_component(component)?;
                let entry = Arc::make_mut(&mut self.use_cases)
                    .get_mut(use_case)
                    .ok_or_else(|| ModelError::UnknownUseCase(use_case.clone()))?;
                entry.component = component.clone();
            }
            Modification::SetTransactionBehavior {
                candidate,
                behavior,
            } => {
                let entry = Arc::make_mut(&mut self.service_candidates)
                    .get_mut(candidate)
                    .ok_or_else(|| ModelError::UnknownServiceCandidate(candidate.clone()))?;
                entry.transaction_behavior = *behavior;
            }
            Modification::SetAsynchronous {
                candidate,
                asynchronous,
            } => {
                let entry = Arc::make_mut(&mut self.service_candidates)
                    .get_mut(candidate)
                    .ok_or_else(|| ModelError::UnknownServiceCandidate(candidate.clone()))?;
                entry.asynchronous = *asynchronous;
            }
            Modification::SetConnection { connection } => {
                self.require_component(&connection.source)?;
                self.require_component(&connection.target)?;
                Arc::make_mut(&mut self.connections).insert(connection.key(), connection.clone());
            }
            Modification::RemoveConnection { source, target } => {
                Arc::make_mut(&mut self.connections)
                    .remove(&(source.clone(), target.clone()))
                    .ok_or_else(|| ModelError::UnknownConnection {
                        from: source.clone(),
                        to: target.clone(),
                    })?;
            }
            Modification::SetEntityOwner {
                entity_type,
                component,
            } => {
                if let Some(component) = component {
                    self.require_component(component)?;
                }
                let entry = Arc::make_mut(&mut self.entity_types)
                    .get_mut(entity_type)
                    .ok_or_else(|| ModelError::UnknownEntityType(entity_type.clone()))?;
                entry.component = component.clone();
            }
            Modification::SetConflictPolicy { data_store, policy } => {
                let entry = Arc::make_mut(&mut self.data_stores)
                    .get_mut(data_store)
                    .ok_or_else(|| ModelError::UnknownDataStore(data_store.clone()))?;
                entry.conflict_policy = *policy;
            }
        }
        Ok(())
    }

    fn require_component(&self, component: &str) -> Result<(), ModelError> {
        if self.components.contains(component) {
            Ok(())
        } else {
            Err(ModelError::UnknownComponent(component.to_string()))
        }
    }
}

/// Collects declarations and validates cross references on [`build`](Self::build).
#[derive(Debug, Default)]
pub struct DeploymentModelBuilder {
    components: BTreeSet<String>,
    use_cases: HashMap<String, UseCase>,
    service_candidates: HashMap<String, ServiceCandidate>,
    data_stores: HashMap<String, DataStore>,
    entity_types: HashMap<String, EntityType>,
    connections: HashMap<(String, String), Connection>,
}

impl DeploymentModelBuilder {
    pub fn component(mut self, name: impl Into<String>) -> Self {
        self.components.insert(name.into());
        self
    }

    pub fn use_case(mut self, name: impl Into<String>, component: impl Into<String>) -> Self {
        let name = name.into();
        self.use_cases.insert(
            name.clone(),
            UseCase {
                name,
                component: component.into(),
            },
        );
        self
    }

    pub fn service_candidate(mut self, candidate: ServiceCandidate) -> Self {
        self.service_candidates
            .insert(candidate.name.clone(), candidate);
        self
    }

    pub fn data_store(mut self, name: impl Into<String>, conflict_policy: ConflictPolicy) -> Self {
        let name = name.into();
        self.data_stores.insert(
            name.clone(),
            DataStore {
                name,
                conflict_policy,
            },
        );
        self
    }

    pub fn entity_type(
        mut self,
        name: impl Into<String>,
        data_store: impl Into<String>,
        component: Option<String>,
    ) -> Self {
        let name = name.into();
        self.entity_types.insert(
            name.clone(),
            EntityType {
                name,
                data_store: data_store.into(),
                component,
            },
        );
        self
    }

    pub fn connection(mut self, connection: Connection) -> Self {
        self.connections.insert(connection.key(), connection);
        self
    }

    pub fn build(self) -> Result<DeploymentModel, ModelError> {
        let known = |component: &str| -> Result<(), ModelError> {
            if self.components.contains(component) {
                Ok(())
            } else {
                Err(ModelError::UnknownComponent(component.to_string()))
            }
        };

        for use_case in self.use_cases.values() {
            known(&use_case.component)?;
        }
        for candidate in self.service_candidates.values() {
            known(&candidate.component)?;
        }
        for entity_type in self.entity_types.values() {
            if !self.data_stores.contains_key(&entity_type.data_store) {
                return Err(ModelError::UnknownDataStore(entity_type.data_store.clone()));
            }
            if let Some(component) = &entity_type.component {
                known(component)?;
            }
        }
        for connection in self.connections.values() {
            known(&connection.source)?;
            known(&connection.target)?;
        }

        Ok(DeploymentModel {
            components: Arc::new(self.components),
            use_cases: Arc::new(self.use_cases),
            service_candidates: Arc::new(self.service_candidates),
            data_stores: Arc::new(self.data_stores),
            entity_types: Arc::new(self.entity_types),
            connections: Arc::new(self.connections),
        })
    }
}
