//! Predicates over archetype masks.
//!
//! A [`Filter`] decides which archetypes a query visits. Plain [`Mask`]es
//! match every archetype containing all of their IDs; [`MaskFilter`] adds an
//! exclusion set; [`RelationFilter`] narrows any filter to one relation
//! target; [`CachedFilter`] is a handle to a filter registered with the
//! world's filter cache. The [`logic`] module combines filters with boolean
//! operators.

use std::fmt;
use std::sync::Arc;

use crate::archetype::Archetype;
use crate::bitmask::Mask;
use crate::component::ComponentId;
use crate::entity::Entity;

/// A predicate over component masks.
pub trait Filter: Send + Sync {
    /// Whether an archetype with `mask` matches.
    fn matches(&self, mask: &Mask) -> bool;

    /// Relation target the filter is restricted to, if any.
    fn relation_target(&self) -> Option<Entity> {
        None
    }

    /// The cache registration behind this filter, if any.
    fn cached(&self) -> Option<&CachedFilter> {
        None
    }
}

/// Whether `archetype` satisfies both the mask predicate and the relation
/// target restriction of `filter`.
pub(crate) fn matches_archetype(filter: &dyn Filter, archetype: &Archetype) -> bool {
    filter.matches(archetype.mask())
        && filter
            .relation_target()
            .map_or(true, |target| archetype.target() == target)
}

impl<F: Filter + ?Sized> Filter for &F {
    fn matches(&self, mask: &Mask) -> bool {
        (**self).matches(mask)
    }
    fn relation_target(&self) -> Option<Entity> {
        (**self).relation_target()
    }
    fn cached(&self) -> Option<&CachedFilter> {
        (**self).cached()
    }
}

impl<F: Filter + ?Sized> Filter for Box<F> {
    fn matches(&self, mask: &Mask) -> bool {
        (**self).matches(mask)
    }
    fn relation_target(&self) -> Option<Entity> {
        (**self).relation_target()
    }
    fn cached(&self) -> Option<&CachedFilter> {
        (**self).cached()
    }
}

// ---------------------------------------------------------------------------
// Mask and MaskFilter
// ---------------------------------------------------------------------------

/// A mask matches every archetype that has all of its components.
impl Filter for Mask {
    #[inline]
    fn matches(&self, mask: &Mask) -> bool {
        mask.contains(self)
    }
}

impl Mask {
    /// Filter for this mask that additionally excludes `exclude`.
    pub fn without(&self, exclude: &[ComponentId]) -> MaskFilter {
        MaskFilter {
            include: *self,
            exclude: Mask::new(exclude),
        }
    }

    /// Filter that matches exactly this mask and nothing more.
    pub fn exclusive(&self) -> MaskFilter {
        MaskFilter {
            include: *self,
            exclude: Mask::not(self),
        }
    }
}

/// Required and excluded components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaskFilter {
    /// Components that must be present.
    pub include: Mask,
    /// Components that must be absent.
    pub exclude: Mask,
}

impl MaskFilter {
    /// Create a filter from include and exclude lists.
    pub fn new(include: &[ComponentId], exclude: &[ComponentId]) -> Self {
        Self {
            include: Mask::new(include),
            exclude: Mask::new(exclude),
        }
    }
}

impl Filter for MaskFilter {
    #[inline]
    fn matches(&self, mask: &Mask) -> bool {
        mask.contains(&self.include) && (self.exclude.is_zero() || !mask.contains_any(&self.exclude))
    }
}

// ---------------------------------------------------------------------------
// RelationFilter
// ---------------------------------------------------------------------------

/// Narrows `filter` to archetypes whose relation target is `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationFilter<F> {
    /// The wrapped mask predicate.
    pub filter: F,
    /// The required relation target.
    pub target: Entity,
}

impl<F: Filter> RelationFilter<F> {
    /// Restrict `filter` to `target`.
    pub fn new(filter: F, target: Entity) -> Self {
        Self { filter, target }
    }
}

impl<F: Filter> Filter for RelationFilter<F> {
    fn matches(&self, mask: &Mask) -> bool {
        self.filter.matches(mask)
    }
    fn relation_target(&self) -> Option<Entity> {
        Some(self.target)
    }
}

// ---------------------------------------------------------------------------
// CachedFilter
// ---------------------------------------------------------------------------

/// Handle to a filter registered with the world's filter cache.
///
/// Queries over a cached filter iterate its maintained archetype list
/// instead of scanning the archetype graph. The handle goes stale when the
/// filter is unregistered.
#[derive(Clone)]
pub struct CachedFilter {
    pub(crate) id: u8,
    pub(crate) filter: Arc<dyn Filter>,
}

impl CachedFilter {
    /// Slot of the filter in the cache.
    pub fn id(&self) -> u8 {
        self.id
    }
}

impl fmt::Debug for CachedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFilter").field("id", &self.id).finish()
    }
}

impl Filter for CachedFilter {
    fn matches(&self, mask: &Mask) -> bool {
        self.filter.matches(mask)
    }
    fn relation_target(&self) -> Option<Entity> {
        self.filter.relation_target()
    }
    fn cached(&self) -> Option<&CachedFilter> {
        Some(self)
    }
}

// ---------------------------------------------------------------------------
// Logic filters
// ---------------------------------------------------------------------------

/// Boolean combinators over filters.
///
/// Combined filters never carry a relation target; wrap the combination in a
/// [`RelationFilter`] instead.
pub mod logic {
    use super::Filter;
    use crate::bitmask::Mask;

    /// Matches archetypes with all of the components. Same as a bare mask.
    #[derive(Debug, Clone, Copy)]
    pub struct All(pub Mask);

    impl Filter for All {
        fn matches(&self, mask: &Mask) -> bool {
            mask.contains(&self.0)
        }
    }

    /// Matches archetypes with at least one of the components.
    #[derive(Debug, Clone, Copy)]
    pub struct Any(pub Mask);

    impl Filter for Any {
        fn matches(&self, mask: &Mask) -> bool {
            mask.contains_any(&self.0)
        }
    }

    /// Matches archetypes with none of the components.
    #[derive(Debug, Clone, Copy)]
    pub struct NoneOf(pub Mask);

    impl Filter for NoneOf {
        fn matches(&self, mask: &Mask) -> bool {
            !mask.contains_any(&self.0)
        }
    }

    /// Matches archetypes that lack at least one of the components.
    #[derive(Debug, Clone, Copy)]
    pub struct AnyNot(pub Mask);

    impl Filter for AnyNot {
        fn matches(&self, mask: &Mask) -> bool {
            !mask.contains(&self.0)
        }
    }

    /// Both filters match.
    #[derive(Debug, Clone, Copy)]
    pub struct And<L, R>(pub L, pub R);

    impl<L: Filter, R: Filter> Filter for And<L, R> {
        fn matches(&self, mask: &Mask) -> bool {
            self.0.matches(mask) && self.1.matches(mask)
        }
    }

    /// At least one filter matches.
    #[derive(Debug, Clone, Copy)]
    pub struct Or<L, R>(pub L, pub R);

    impl<L: Filter, R: Filter> Filter for Or<L, R> {
        fn matches(&self, mask: &Mask) -> bool {
            self.0.matches(mask) || self.1.matches(mask)
        }
    }

    /// Exactly one filter matches.
    #[derive(Debug, Clone, Copy)]
    pub struct XOr<L, R>(pub L, pub R);

    impl<L: Filter, R: Filter> Filter for XOr<L, R> {
        fn matches(&self, mask: &Mask) -> bool {
            self.0.matches(mask) != self.1.matches(mask)
        }
    }

    /// The filter does not match.
    #[derive(Debug, Clone, Copy)]
    pub struct Not<F>(pub F);

    impl<F: Filter> Filter for Not<F> {
        fn matches(&self, mask: &Mask) -> bool {
            !self.0.matches(mask)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
