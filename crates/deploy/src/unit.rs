//! Deployment units and the caller-owned registry they are declared in.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{DeployError, ExecutionContext, TagSet, UnitId};

/// The body of a deployment unit.
#[async_trait]
pub trait UnitBody: Send + Sync {
    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()>;
}

/// Adapts a closure returning a boxed future into a [`UnitBody`].
struct FnBody<F>(F);

#[async_trait]
impl<F> UnitBody for FnBody<F>
where
    F: for<'a> Fn(&'a mut ExecutionContext) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync,
{
    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// Body of units declared without one.
struct NoopBody;

#[async_trait]
impl UnitBody for NoopBody {
    async fn run(&self, _ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A dependency edge, optionally dropped under some active tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: UnitId,
    /// The edge is ignored when any of these tags is active.
    pub unless_tags: TagSet,
}

impl Dependency {
    pub fn new(id: impl Into<UnitId>) -> Self {
        Self {
            id: id.into(),
            unless_tags: TagSet::new(),
        }
    }

    pub fn applies_to(&self, active_tags: &TagSet) -> bool {
        self.unless_tags.is_disjoint(active_tags)
    }
}

/// One idempotent step of a deployment.
#[derive(Clone)]
pub struct DeploymentUnit {
    id: UnitId,
    dependencies: Vec<Dependency>,
    tags: TagSet,
    body: Arc<dyn UnitBody>,
}

impl fmt::Debug for DeploymentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentUnit")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

impl DeploymentUnit {
    pub fn new(id: impl Into<UnitId>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            tags: TagSet::new(),
            body: Arc::new(NoopBody),
        }
    }

    /// Depend on `ids` in every environment.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UnitId>,
    {
        self.dependencies
            .extend(ids.into_iter().map(Dependency::new));
        self
    }

    /// Depend on `ids` except when one of `unless_tags` is active.
    pub fn depends_on_unless<I, S, T, U>(mut self, ids: I, unless_tags: T) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UnitId>,
        T: IntoIterator<Item = U>,
        U: Into<String>,
    {
        let unless_tags: TagSet = unless_tags.into_iter().map(Into::into).collect();
        self.dependencies.extend(ids.into_iter().map(|id| Dependency {
            id: id.into(),
            unless_tags: unless_tags.clone(),
        }));
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn body(mut self, body: impl UnitBody + 'static) -> Self {
        self.body = Arc::new(body);
        self
    }

    /// Use a closure as body: `|ctx| Box::pin(async move { .. })`.
    pub fn body_fn<F>(self, body: F) -> Self
    where
        F: for<'a> Fn(&'a mut ExecutionContext) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.body(FnBody(body))
    }

    pub fn id(&self) -> &UnitId {
        &self.id
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn unit_tags(&self) -> &TagSet {
        &self.tags
    }

    pub(crate) fn runner(&self) -> Arc<dyn UnitBody> {
        self.body.clone()
    }

    /// Dependencies in effect under `active_tags`, in declaration order.
    pub fn effective_dependencies(&self, active_tags: &TagSet) -> Vec<UnitId> {
        let mut effective: Vec<UnitId> = Vec::with_capacity(self.dependencies.len());
        for dependency in &self.dependencies {
            if dependency.applies_to(active_tags) && !effective.contains(&dependency.id) {
                effective.push(dependency.id.clone());
            }
        }
        effective
    }

    /// Whether this unit is selected by `active_tags`. An empty tag set selects all.
    pub fn matches(&self, active_tags: &TagSet) -> bool {
        active_tags.is_empty() || !self.tags.is_disjoint(active_tags)
    }
}

/// Declaration-ordered set of units with unique ids.
#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    units: Vec<DeploymentUnit>,
    index: HashMap<UnitId, usize>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting duplicate ids.
    pub fn from_units(units: impl IntoIterator<Item = DeploymentUnit>) -> Result<Self, DeployError> {
        let mut registry = Self::new();
        for unit in units {
            registry.register(unit)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, unit: DeploymentUnit) -> Result<(), DeployError> {
        if self.index.contains_key(unit.id()) {
            return Err(DeployError::DuplicateUnit(unit.id().clone()));
        }
        self.index.insert(unit.id().clone(), self.units.len());
        self.units.push(unit);
        Ok(())
    }

    pub fn get(&self, id: &UnitId) -> Option<&DeploymentUnit> {
        self.index.get(id).map(|&i| &self.units[i])
    }

    pub(crate) fn position(&self, id: &UnitId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Units in declaration order.
    pub fn units(&self) -> &[DeploymentUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag_set;

    #[test]
    fn test_conditional_dependencies() {
        let unit = DeploymentUnit::new("arfv")
            .depends_on(["roles"])
            .depends_on_unless(["treasury", "allocator"], ["prod"]);

        assert_eq!(
            unit.effective_dependencies(&tag_set(["test"])),
            vec![UnitId::from("roles"), "treasury".into(), "allocator".into()]
        );
        assert_eq!(
            unit.effective_dependencies(&tag_set(["prod"])),
            vec![UnitId::from("roles")]
        );
    }

    #[test]
    fn test_repeated_dependency_is_listed_once() {
        let unit = DeploymentUnit::new("b").depends_on(["a", "a"]);
        assert_eq!(unit.effective_dependencies(&TagSet::new()), vec![UnitId::from("a")]);
    }

    #[test]
    fn test_tag_matching() {
        let unit = DeploymentUnit::new("a").tags(["local", "test"]);

        assert!(unit.matches(&tag_set(["test"])));
        assert!(!unit.matches(&tag_set(["prod"])));
        assert!(unit.matches(&TagSet::new()));
        assert!(!DeploymentUnit::new("untagged").matches(&tag_set(["test"])));
    }

    #[test]
    fn test_duplicate_unit_is_rejected() {
        let result = UnitRegistry::from_units([
            DeploymentUnit::new("a"),
            DeploymentUnit::new("b"),
            DeploymentUnit::new("a"),
        ]);

        assert!(matches!(result, Err(DeployError::DuplicateUnit(id)) if id.as_str() == "a"));
    }

    #[test]
    fn test_registry_keeps_declaration_order() {
        let registry = UnitRegistry::from_units([
            DeploymentUnit::new("c"),
            DeploymentUnit::new("a"),
            DeploymentUnit::new("b"),
        ])
        .unwrap();

        let ids: Vec<_> = registry.units().iter().map(|u| u.id().as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(registry.position(&"b".into()), Some(2));
    }
}
