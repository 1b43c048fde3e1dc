//! Archetype storage.
//!
//! An [`Archetype`] stores all entities that share the exact same component
//! mask (and, for relation archetypes, the same relation target). Components
//! are laid out Structure-of-Arrays: one [`Column`] per component type plus a
//! parallel `Vec<Entity>` mapping row index to entity.
//!
//! # Safety
//!
//! [`Column`] stores component values as type-erased bytes. Every column owns
//! the [`ComponentVtable`] of its concrete type, and every typed accessor
//! compares the requested `TypeId` against the vtable before casting, so the
//! public API of this module is safe.
// Note: unsafe_code is allowed on this module via #[allow(unsafe_code)] in lib.rs

use std::alloc::{self, Layout};
use std::any::{Any, TypeId};
use std::fmt;
use std::ptr;

use crate::bitmask::Mask;
use crate::component::{Component, ComponentId, ComponentValue};
use crate::entity::Entity;
use crate::node::NodeId;
use crate::EcsError;

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Identifies an archetype within the world. Index into the archetype arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

// ---------------------------------------------------------------------------
// ComponentVtable -- type-erased operations for a component type
// ---------------------------------------------------------------------------

type BoxedValue = Box<dyn Any + Send>;

/// Function pointers for the type-erased lifecycle of a component value.
///
/// Created via [`ComponentVtable::new::<T>()`] at registration time and copied
/// into every column of that component.
#[derive(Clone, Copy)]
pub(crate) struct ComponentVtable {
    /// Drop a single value in place.
    drop_fn: unsafe fn(*mut u8),
    /// Clone the value at `src` into uninitialized `dst`.
    clone_fn: unsafe fn(*const u8, *mut u8),
    /// Write `T::default()` into uninitialized `dst`.
    default_fn: unsafe fn(*mut u8),
    /// Move a boxed `T` into uninitialized `dst`. Hands the box back if it
    /// holds another type.
    write_fn: unsafe fn(BoxedValue, *mut u8) -> Result<(), BoxedValue>,
    size: usize,
    align: usize,
    type_id: TypeId,
    type_name: &'static str,
}

impl fmt::Debug for ComponentVtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentVtable")
            .field("type_name", &self.type_name)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

impl ComponentVtable {
    /// Create a vtable for a concrete component type `T`.
    pub(crate) fn new<T: Component>() -> Self {
        unsafe fn drop_fn_impl<T>(ptr: *mut u8) {
            ptr::drop_in_place(ptr as *mut T);
        }

        unsafe fn clone_fn_impl<T: Clone>(src: *const u8, dst: *mut u8) {
            let value = &*(src as *const T);
            ptr::write(dst as *mut T, value.clone());
        }

        unsafe fn default_fn_impl<T: Default>(dst: *mut u8) {
            ptr::write(dst as *mut T, T::default());
        }

        unsafe fn write_fn_impl<T: 'static>(value: BoxedValue, dst: *mut u8) -> Result<(), BoxedValue> {
            let value = value.downcast::<T>()?;
            ptr::write(dst as *mut T, *value);
            Ok(())
        }

        Self {
            drop_fn: drop_fn_impl::<T>,
            clone_fn: clone_fn_impl::<T>,
            default_fn: default_fn_impl::<T>,
            write_fn: write_fn_impl::<T>,
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

// ---------------------------------------------------------------------------
// Column -- type-erased component storage
// ---------------------------------------------------------------------------

/// A type-erased, densely packed array of component values of a single type.
///
/// Capacity is managed by the owning [`Archetype`], which grows all of its
/// columns in lockstep.
pub(crate) struct Column {
    /// Pointer to the heap allocation (null when nothing is allocated).
    data: *mut u8,
    /// Number of initialized elements.
    len: usize,
    /// Number of elements that fit in the current allocation.
    capacity: usize,
    vtable: ComponentVtable,
}

// Column only stores raw bytes; every component type is `Send` by the bound
// on `Component`.
unsafe impl Send for Column {}

impl Column {
    fn new(vtable: ComponentVtable) -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
            capacity: 0,
            vtable,
        }
    }

    /// Layout of a buffer of `cap` elements. `None` for zero-sized types,
    /// for zero capacity, and when the size does not fit a layout.
    fn layout_for_capacity(&self, cap: usize) -> Option<Layout> {
        if self.vtable.size == 0 || cap == 0 {
            return None;
        }
        let size = self.vtable.size.checked_mul(cap)?;
        Layout::from_size_align(size, self.vtable.align).ok()
    }

    /// Grow the allocation so that it holds exactly `new_cap` elements.
    fn reserve_total(&mut self, new_cap: usize) -> Result<(), EcsError> {
        if new_cap <= self.capacity {
            return Ok(());
        }
        if self.vtable.size == 0 {
            self.capacity = new_cap;
            return Ok(());
        }
        let new_layout = self.layout_for_capacity(new_cap).ok_or(EcsError::CapacityExceeded {
            what: "bytes in a column",
            limit: isize::MAX as usize,
        })?;
        // SAFETY: the old layout is the one the current buffer was allocated
        // with, and `new_layout` has the same alignment.
        let new_data = unsafe {
            match self.layout_for_capacity(self.capacity) {
                Some(old_layout) if !self.data.is_null() => {
                    alloc::realloc(self.data, old_layout, new_layout.size())
                }
                _ => alloc::alloc(new_layout),
            }
        };
        if new_data.is_null() {
            alloc::handle_alloc_error(new_layout);
        }
        self.data = new_data;
        self.capacity = new_cap;
        Ok(())
    }

    #[inline]
    fn ptr_at(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.capacity);
        if self.vtable.size == 0 {
            // ZST: dangling but aligned.
            return self.vtable.align as *mut u8;
        }
        // SAFETY: `index` is within the allocation.
        unsafe { self.data.add(index * self.vtable.size) }
    }

    fn push_default(&mut self) {
        debug_assert!(self.len < self.capacity);
        // SAFETY: the slot at `len` is allocated and uninitialized.
        unsafe { (self.vtable.default_fn)(self.ptr_at(self.len)) };
        self.len += 1;
    }

    /// Move the bytes of `src` row `index` onto the end of this column.
    ///
    /// # Safety
    ///
    /// `src` must store the same component type. The source slot must be
    /// forgotten afterwards (see [`Column::swap_remove`] with `drop == false`).
    unsafe fn push_moved(&mut self, src: &Column, index: usize) {
        debug_assert!(self.len < self.capacity);
        debug_assert!(index < src.len);
        if self.vtable.size > 0 {
            ptr::copy_nonoverlapping(src.ptr_at(index), self.ptr_at(self.len), self.vtable.size);
        }
        self.len += 1;
    }

    /// Swap-remove the element at `index`, moving the last element into its
    /// place. The removed element is dropped when `drop` is set and forgotten
    /// otherwise (its bytes were moved elsewhere).
    fn swap_remove(&mut self, index: usize, drop: bool) {
        assert!(index < self.len, "column index out of bounds");
        let last = self.len - 1;
        // SAFETY: `index` and `last` are initialized slots. After the drop or
        // move-out, the slot at `index` is overwritten by `last`, which then
        // becomes logically uninitialized.
        unsafe {
            if drop {
                (self.vtable.drop_fn)(self.ptr_at(index));
            }
            if index != last && self.vtable.size > 0 {
                ptr::copy_nonoverlapping(self.ptr_at(last), self.ptr_at(index), self.vtable.size);
            }
        }
        self.len -= 1;
    }

    /// Remove every element, dropping them when `drop` is set.
    fn clear(&mut self, drop: bool) {
        let len = self.len;
        self.len = 0;
        if drop {
            for i in 0..len {
                // SAFETY: slots `0..len` were initialized.
                unsafe { (self.vtable.drop_fn)(self.ptr_at(i)) };
            }
        }
    }

    /// Replace the value at `index` with a boxed value of the column's type.
    fn replace_boxed(&mut self, index: usize, value: BoxedValue) -> Result<(), BoxedValue> {
        assert!(index < self.len, "column index out of bounds");
        if (*value).type_id() != self.vtable.type_id {
            return Err(value);
        }
        let slot = self.ptr_at(index);
        // SAFETY: the slot is initialized and the type was checked above, so
        // the write cannot fail after the old value is dropped.
        unsafe {
            (self.vtable.drop_fn)(slot);
            (self.vtable.write_fn)(value, slot)
        }
    }

    /// Drop the value at `index` and write the default in its place.
    fn reset_default(&mut self, index: usize) {
        assert!(index < self.len, "column index out of bounds");
        let slot = self.ptr_at(index);
        // SAFETY: the slot is initialized; it is dropped and rewritten in
        // place.
        unsafe {
            (self.vtable.drop_fn)(slot);
            (self.vtable.default_fn)(slot);
        }
    }

    /// Clone the value at `src` over the value at `dst`.
    fn clone_within(&mut self, src: usize, dst: usize) {
        assert!(src < self.len && dst < self.len, "column index out of bounds");
        if src == dst {
            return;
        }
        // SAFETY: both slots are initialized and distinct.
        unsafe {
            (self.vtable.drop_fn)(self.ptr_at(dst));
            (self.vtable.clone_fn)(self.ptr_at(src), self.ptr_at(dst));
        }
    }

    fn typed<T: 'static>(&self, id: ComponentId) -> Result<(), EcsError> {
        if self.vtable.type_id == TypeId::of::<T>() {
            Ok(())
        } else {
            Err(EcsError::TypeMismatch {
                id,
                stored: self.vtable.type_name,
                requested: std::any::type_name::<T>(),
            })
        }
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        self.clear(true);
        if let Some(layout) = self.layout_for_capacity(self.capacity) {
            if !self.data.is_null() {
                // SAFETY: allocated with this exact layout in `reserve_total`.
                unsafe { alloc::dealloc(self.data, layout) };
            }
        }
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("vtable", &self.vtable)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// Columnar storage for all entities with one exact component mask and, for
/// relation archetypes, one relation target.
///
/// Columns are sorted by [`ComponentId`] and found by binary search; presence
/// checks go through the mask.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    node: NodeId,
    mask: Mask,
    /// Sorted component IDs. Invariant: `columns[i]` stores `ids[i]`.
    ids: Vec<ComponentId>,
    columns: Vec<Column>,
    entities: Vec<Entity>,
    relation: Option<ComponentId>,
    target: Entity,
    active: bool,
    capacity: usize,
    capacity_increment: usize,
}

impl Archetype {
    pub(crate) fn new(
        id: ArchetypeId,
        node: NodeId,
        mask: Mask,
        columns: Vec<(ComponentId, ComponentVtable)>,
        relation: Option<ComponentId>,
        target: Entity,
        capacity_increment: usize,
    ) -> Self {
        let mut columns = columns;
        columns.sort_by_key(|(id, _)| *id);
        let (ids, columns): (Vec<_>, Vec<_>) = columns
            .into_iter()
            .map(|(id, vtable)| (id, Column::new(vtable)))
            .unzip();
        Self {
            id,
            node,
            mask,
            ids,
            columns,
            entities: Vec::new(),
            relation,
            target,
            active: true,
            capacity: 0,
            capacity_increment: capacity_increment.max(1),
        }
    }

    #[inline]
    fn column_index(&self, id: ComponentId) -> Option<usize> {
        if !self.mask.get(id) {
            return None;
        }
        self.ids.binary_search(&id).ok()
    }

    fn column(&self, id: ComponentId) -> Result<&Column, EcsError> {
        let index = self
            .column_index(id)
            .ok_or(EcsError::MissingComponent { id })?;
        Ok(&self.columns[index])
    }

    fn column_mut(&mut self, id: ComponentId) -> Result<&mut Column, EcsError> {
        let index = self
            .column_index(id)
            .ok_or(EcsError::MissingComponent { id })?;
        Ok(&mut self.columns[index])
    }

    fn check_row(&self, row: u32) -> Result<usize, EcsError> {
        let row = row as usize;
        if row < self.entities.len() {
            Ok(row)
        } else {
            Err(EcsError::InvalidOperation("archetype row out of bounds"))
        }
    }

    /// The archetype's ID.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The graph node this archetype belongs to.
    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The component mask shared by all rows.
    #[inline]
    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// The sorted component IDs.
    #[inline]
    pub fn ids(&self) -> &[ComponentId] {
        &self.ids
    }

    /// Whether the archetype stores component `id`.
    #[inline]
    pub fn has(&self, id: ComponentId) -> bool {
        self.mask.get(id)
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the archetype holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of rows that fit without growing.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The entity column.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// The entity at `row`.
    #[inline]
    pub fn entity(&self, row: u32) -> Entity {
        self.entities[row as usize]
    }

    /// The relation component, if the archetype has one.
    #[inline]
    pub fn relation(&self) -> Option<ComponentId> {
        self.relation
    }

    /// The relation target shared by all rows. Zero when there is none.
    #[inline]
    pub fn target(&self) -> Entity {
        self.target
    }

    /// Whether the archetype is in use. Inactive relation archetypes wait in
    /// their node's free list for a new target.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    // -- row allocation ------------------------------------------------------

    /// Make room for `additional` more rows, growing in whole increments.
    ///
    /// Rows are addressed by `u32`, so an archetype never grows past
    /// `u32::MAX` rows.
    fn reserve(&mut self, additional: usize) -> Result<(), EcsError> {
        let exceeded = || EcsError::CapacityExceeded {
            what: "rows in an archetype",
            limit: u32::MAX as usize,
        };
        let required = self
            .entities
            .len()
            .checked_add(additional)
            .filter(|required| *required <= u32::MAX as usize)
            .ok_or_else(exceeded)?;
        if required <= self.capacity {
            return Ok(());
        }
        let increments = required.div_ceil(self.capacity_increment);
        let new_cap = increments
            .checked_mul(self.capacity_increment)
            .ok_or_else(exceeded)?
            .min(u32::MAX as usize);
        for column in &mut self.columns {
            column.reserve_total(new_cap)?;
        }
        self.entities.reserve_exact(new_cap - self.entities.len());
        self.capacity = new_cap;
        Ok(())
    }

    /// Append a default-initialized row for `entity`. Returns its index.
    pub(crate) fn alloc_row(&mut self, entity: Entity) -> Result<u32, EcsError> {
        self.reserve(1)?;
        let row = self.entities.len() as u32;
        for column in &mut self.columns {
            column.push_default();
        }
        self.entities.push(entity);
        Ok(row)
    }

    /// Append `count` default-initialized rows with zero entities. Returns
    /// the index of the first one; fill entities in with [`set_entity`].
    ///
    /// [`set_entity`]: Archetype::set_entity
    pub(crate) fn alloc_rows(&mut self, count: u32) -> Result<u32, EcsError> {
        self.reserve(count as usize)?;
        let start = self.entities.len() as u32;
        for column in &mut self.columns {
            for _ in 0..count {
                column.push_default();
            }
        }
        self.entities
            .extend(std::iter::repeat(Entity::ZERO).take(count as usize));
        Ok(start)
    }

    pub(crate) fn set_entity(&mut self, row: u32, entity: Entity) {
        self.entities[row as usize] = entity;
    }

    /// Move row `src_row` of `src` into a new row of `self`.
    ///
    /// Components present in both archetypes are moved; components only in
    /// `self` are default-initialized; components only in `src` are dropped.
    /// Returns the new row and whether removing the source row swapped
    /// another entity into `src_row`.
    pub(crate) fn move_row_from(&mut self, src: &mut Archetype, src_row: u32) -> Result<(u32, bool), EcsError> {
        let src_index = src.entities.len();
        assert!((src_row as usize) < src_index, "archetype row out of bounds");
        self.reserve(1)?;
        let row = self.entities.len() as u32;
        for (id, column) in self.ids.iter().zip(self.columns.iter_mut()) {
            match src.column_index(*id) {
                // SAFETY: same component ID means same vtable, and the source
                // slot is forgotten by `remove_moved_row` below.
                Some(i) => unsafe { column.push_moved(&src.columns[i], src_row as usize) },
                None => column.push_default(),
            }
        }
        self.entities.push(src.entities[src_row as usize]);
        let swapped = src.remove_moved_row(src_row, &self.mask);
        Ok((row, swapped))
    }

    /// Move every row of `src` to the end of `self`, leaving `src` empty.
    /// Returns the index of the first moved row and the number of rows.
    pub(crate) fn move_rows_from(&mut self, src: &mut Archetype) -> Result<(u32, u32), EcsError> {
        let count = src.entities.len();
        self.reserve(count)?;
        let start = self.entities.len() as u32;
        for (id, column) in self.ids.iter().zip(self.columns.iter_mut()) {
            match src.column_index(*id) {
                Some(i) => {
                    for row in 0..count {
                        // SAFETY: see `move_row_from`; `src` is cleared below.
                        unsafe { column.push_moved(&src.columns[i], row) };
                    }
                }
                None => {
                    for _ in 0..count {
                        column.push_default();
                    }
                }
            }
        }
        self.entities.extend_from_slice(&src.entities);
        src.clear_moved(&self.mask);
        Ok((start, count as u32))
    }

    /// Swap-remove `row`, dropping its component values. Returns whether the
    /// last row was moved into `row`.
    pub(crate) fn remove_row(&mut self, row: u32) -> bool {
        self.remove_moved_row(row, &Mask::ZERO)
    }

    /// Swap-remove `row`. Columns in `moved` are forgotten because their
    /// values now live elsewhere; the others are dropped.
    fn remove_moved_row(&mut self, row: u32, moved: &Mask) -> bool {
        let index = row as usize;
        let last = self.entities.len() - 1;
        for (id, column) in self.ids.iter().zip(self.columns.iter_mut()) {
            column.swap_remove(index, !moved.get(*id));
        }
        self.entities.swap_remove(index);
        index != last
    }

    fn clear_moved(&mut self, moved: &Mask) {
        for (id, column) in self.ids.iter().zip(self.columns.iter_mut()) {
            column.clear(!moved.get(*id));
        }
        self.entities.clear();
    }

    /// Drop every row, keeping the allocation.
    pub(crate) fn reset(&mut self) {
        self.clear_moved(&Mask::ZERO);
    }

    /// Bind an inactive archetype to a new relation target.
    pub(crate) fn activate(&mut self, target: Entity) {
        self.target = target;
        self.active = true;
    }

    /// Drop every row and park the archetype for reuse.
    pub(crate) fn deactivate(&mut self) {
        self.reset();
        self.target = Entity::ZERO;
        self.active = false;
    }

    // -- component access ----------------------------------------------------

    /// Typed read access to component `id` at `row`.
    pub fn get<T: 'static>(&self, row: u32, id: ComponentId) -> Result<&T, EcsError> {
        let row = self.check_row(row)?;
        let column = self.column(id)?;
        column.typed::<T>(id)?;
        // SAFETY: row is in bounds and the stored type is `T`.
        Ok(unsafe { &*(column.ptr_at(row) as *const T) })
    }

    /// Typed write access to component `id` at `row`.
    pub fn get_mut<T: 'static>(&mut self, row: u32, id: ComponentId) -> Result<&mut T, EcsError> {
        let row = self.check_row(row)?;
        let column = self.column_mut(id)?;
        column.typed::<T>(id)?;
        // SAFETY: row is in bounds, the stored type is `T`, and the borrow of
        // `self` is exclusive.
        Ok(unsafe { &mut *(column.ptr_at(row) as *mut T) })
    }

    /// Overwrite component `value.id` at `row`.
    pub(crate) fn set_value(&mut self, row: u32, value: ComponentValue) -> Result<(), EcsError> {
        let row = self.check_row(row)?;
        let id = value.id;
        let column = self.column_mut(id)?;
        column.replace_boxed(row, value.value).map_err(|_| EcsError::TypeMismatch {
            id,
            stored: column.vtable.type_name,
            requested: "<boxed value>",
        })
    }

    /// Reset component `id` at `rows` to its default value.
    pub(crate) fn reset_component(&mut self, id: ComponentId, rows: std::ops::Range<u32>) -> Result<(), EcsError> {
        if rows.end as usize > self.entities.len() {
            return Err(EcsError::InvalidOperation("archetype row out of bounds"));
        }
        let column = self.column_mut(id)?;
        for row in rows {
            column.reset_default(row as usize);
        }
        Ok(())
    }

    /// Check that `value` may be written to this archetype.
    pub(crate) fn check_value(&self, value: &ComponentValue) -> Result<(), EcsError> {
        let column = self.column(value.id)?;
        if (*value.value).type_id() == column.vtable.type_id {
            Ok(())
        } else {
            Err(EcsError::TypeMismatch {
                id: value.id,
                stored: column.vtable.type_name,
                requested: "<boxed value>",
            })
        }
    }

    /// Clone component `id` from row `src` into rows `dst` (overwriting).
    pub(crate) fn clone_component(&mut self, id: ComponentId, src: u32, dst: std::ops::Range<u32>) -> Result<(), EcsError> {
        let src = self.check_row(src)?;
        if dst.end as usize > self.entities.len() {
            return Err(EcsError::InvalidOperation("archetype row out of bounds"));
        }
        let column = self.column_mut(id)?;
        for row in dst {
            column.clone_within(src, row as usize);
        }
        Ok(())
    }

    /// Whether every column has exactly as many rows as the entity column.
    pub fn is_coherent(&self) -> bool {
        self.columns.iter().all(|c| c.len == self.entities.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
