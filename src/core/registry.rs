// Reference registry contract and the before/after discovery sequencing around hooks.
use std::collections::HashSet;
use std::hash::Hash;

use crate::core::error::Error;
use crate::core::unit::Unit;

/// A mutable set of reference entities that discovery hooks insert into.
pub trait Registry {
    type Entity: Clone + Eq + Hash;

    fn contains(&self, entity: &Self::Entity) -> bool;

    /// Returns `true` when the entity was not known before.
    fn insert(&mut self, entity: Self::Entity) -> bool;

    /// Every known entity, in insertion order.
    fn entities(&self) -> Vec<Self::Entity>;

    fn len(&self) -> usize {
        self.entities().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Insertion-ordered registry backed by a hash set.
#[derive(Clone, Debug)]
pub struct EntitySet<E> {
    order: Vec<E>,
    index: HashSet<E>,
}

impl<E: Clone + Eq + Hash> EntitySet<E> {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            index: HashSet::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.order.iter()
    }
}

impl<E: Clone + Eq + Hash> Default for EntitySet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Eq + Hash> FromIterator<E> for EntitySet<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        let mut set = Self::new();
        for entity in iter {
            set.insert(entity);
        }
        set
    }
}

impl<E: Clone + Eq + Hash> Registry for EntitySet<E> {
    type Entity = E;

    fn contains(&self, entity: &E) -> bool {
        self.index.contains(entity)
    }

    fn insert(&mut self, entity: E) -> bool {
        if !self.index.insert(entity.clone()) {
            return false;
        }
        self.order.push(entity);
        true
    }

    fn entities(&self) -> Vec<E> {
        self.order.clone()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Hook that inspects one unit and registers whatever entities it references.
///
/// The hook runs to completion before returning; the registry is only observed
/// immediately before and after the call.
pub type DiscoveryHook<R> = Box<dyn FnMut(&mut R, &Unit<'_>) -> Result<(), Error>>;

/// Runs `hook` over `unit` and returns the entities it added, in registry order.
pub fn discover<R, H>(registry: &mut R, hook: H, unit: &Unit<'_>) -> Result<Vec<R::Entity>, Error>
where
    R: Registry,
    H: FnOnce(&mut R, &Unit<'_>) -> Result<(), Error>,
{
    let before: HashSet<R::Entity> = registry.entities().into_iter().collect();
    hook(registry, unit)?;
    Ok(registry
        .entities()
        .into_iter()
        .filter(|entity| !before.contains(entity))
        .collect())
}

/// The registry and optional hook a reader sequences discovery through.
pub(crate) struct Discovery<R: Registry> {
    registry: Option<R>,
    hook: Option<DiscoveryHook<R>>,
}

impl<R: Registry> Discovery<R> {
    pub(crate) fn new(registry: Option<R>, hook: Option<DiscoveryHook<R>>) -> Self {
        Self { registry, hook }
    }

    pub(crate) fn registry(&self) -> Option<&R> {
        self.registry.as_ref()
    }

    pub(crate) fn registry_mut(&mut self) -> Option<&mut R> {
        self.registry.as_mut()
    }

    pub(crate) fn into_registry(self) -> Option<R> {
        self.registry
    }

    /// Without a hook nothing is ever discovered.
    pub(crate) fn run(&mut self, unit: &Unit<'_>) -> Result<Vec<R::Entity>, Error> {
        match (self.registry.as_mut(), self.hook.as_mut()) {
            (Some(registry), Some(hook)) => discover(registry, |r, u| hook(r, u), unit),
            _ => Ok(Vec::new()),
        }
    }
}
