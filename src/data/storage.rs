//! Pluggable storage for one rectangular block of a grid field.
//!
//! A storage owns a flat buffer plus the box (in global coordinates) it
//! represents. For a [`HaloField`](crate::field::HaloField) that box is the
//! local partition grown by the area of interest; for `collect` output it is
//! the whole world; for group transfers it is a quad-tree node's shape.
//!
//! Indexing is row-major with dimension 0 slowest. A *local point* is a
//! point relative to the storage's lower corner.

use core::fmt::{self, Debug};

use crate::halo_error::HaloError;
use crate::topology::point::IntPoint;
use crate::topology::rect::IntRect;

/// Contiguous, indexable grid storage for `T` with slice access.
pub trait GridStorage<T, const D: usize>: Debug + Send + Sync + 'static {
    /// Construct a buffer covering `rect`, filled with `fill`.
    fn with_rect(rect: IntRect<D>, fill: T) -> Self
    where
        T: Clone;

    /// Box this buffer represents.
    fn rect(&self) -> IntRect<D>;

    /// Reshape to cover `rect`; every cell is reset to `fill`.
    fn reshape(&mut self, rect: IntRect<D>, fill: T)
    where
        T: Clone;

    /// Entire read-only buffer.
    fn as_slice(&self) -> &[T];

    /// Entire mutable buffer.
    fn as_mut_slice(&mut self) -> &mut [T];

    /// Current length in elements.
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-axis extent of the buffer.
    fn shape(&self) -> [i64; D] {
        self.rect().size()
    }

    /// Flat index of a local point, `None` if it lies outside the buffer.
    fn flat_index(&self, local: IntPoint<D>) -> Option<usize> {
        let r = self.rect();
        let g = local + r.lo;
        r.contains(&g).then(|| r.flat_index(&g))
    }

    /// Flat index of a global point.
    fn global_index(&self, global: &IntPoint<D>) -> Option<usize> {
        let r = self.rect();
        r.contains(global).then(|| r.flat_index(global))
    }

    fn get(&self, idx: usize) -> Option<&T> {
        self.as_slice().get(idx)
    }

    fn set(&mut self, idx: usize, value: T) -> Result<(), HaloError> {
        let capacity = self.len();
        let slot = self
            .as_mut_slice()
            .get_mut(idx)
            .ok_or(HaloError::StorageRange {
                offset: idx,
                len: 1,
                capacity,
            })?;
        *slot = value;
        Ok(())
    }
}

/// `Vec`-backed storage (default).
#[derive(Clone)]
pub struct VecStorage<T, const D: usize> {
    rect: IntRect<D>,
    data: Vec<T>,
}

impl<T, const D: usize> Debug for VecStorage<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VecStorage")
            .field("rect", &self.rect)
            .field("len", &self.data.len())
            .finish()
    }
}

impl<T, const D: usize> GridStorage<T, D> for VecStorage<T, D>
where
    T: Send + Sync + 'static,
{
    fn with_rect(rect: IntRect<D>, fill: T) -> Self
    where
        T: Clone,
    {
        Self {
            rect,
            data: vec![fill; rect.volume()],
        }
    }

    fn rect(&self) -> IntRect<D> {
        self.rect
    }

    fn reshape(&mut self, rect: IntRect<D>, fill: T)
    where
        T: Clone,
    {
        self.rect = rect;
        self.data.clear();
        self.data.resize(rect.volume(), fill);
    }

    fn as_slice(&self) -> &[T] {
        &self.data
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T, const D: usize> VecStorage<T, D> {
    /// Wrap an existing row-major buffer; its length must match `rect`.
    pub fn from_vec(rect: IntRect<D>, data: Vec<T>) -> Result<Self, HaloError> {
        if data.len() != rect.volume() {
            return Err(HaloError::ShapeMismatch {
                expected: format!("{} cells for {rect}", rect.volume()),
                found: data.len().to_string(),
            });
        }
        Ok(Self { rect, data })
    }

    pub fn into_inner(self) -> Vec<T> {
        self.data
    }

    /// Value at a global point, `None` outside the box.
    pub fn at(&self, p: &IntPoint<D>) -> Option<&T> {
        self.rect
            .contains(p)
            .then(|| &self.data[self.rect.flat_index(p)])
    }
}
