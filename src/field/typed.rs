//! Element-specific field types.
//!
//! The distributed machinery is the same for every element type; these
//! aliases fix the element and the storage, and add a few helpers that only
//! make sense for numbers or for optional objects.

use num_traits::Num;

use crate::algs::communicator::Communicator;
use crate::data::storage::{GridStorage, VecStorage};
use crate::field::{FieldValue, HaloField};
use crate::halo_error::HaloError;
use crate::topology::point::IntPoint;

pub type DoubleGrid<C, const D: usize> = HaloField<f64, C, VecStorage<f64, D>, D>;
pub type IntGrid<C, const D: usize> = HaloField<i32, C, VecStorage<i32, D>, D>;
/// Cells hold at most one object; `None` is an empty cell.
pub type ObjectGrid<E, C, const D: usize> = HaloField<Option<E>, C, VecStorage<Option<E>, D>, D>;

pub type DoubleGrid2D<C> = DoubleGrid<C, 2>;
pub type IntGrid2D<C> = IntGrid<C, 2>;
pub type ObjectGrid2D<E, C> = ObjectGrid<E, C, 2>;

impl<T, C, S, const D: usize> HaloField<T, C, S, D>
where
    T: FieldValue + Num + Copy,
    C: Communicator,
    S: GridStorage<T, D>,
{
    /// Sum over the owned cells.
    pub fn local_sum(&self) -> T {
        self.fold_local(T::zero(), |acc, _, &v| acc + v)
    }
}

impl<E, C, S, const D: usize> HaloField<Option<E>, C, S, D>
where
    Option<E>: FieldValue,
    C: Communicator,
    S: GridStorage<Option<E>, D>,
{
    /// Remove and return the object in an owned cell.
    pub fn take(&mut self, p: &IntPoint<D>) -> Result<Option<E>, HaloError> {
        let current = self.try_get(p)?;
        if current.is_some() {
            self.try_set(p, None)?;
        }
        Ok(current)
    }

    /// Owned cells holding an object, row-major.
    pub fn occupied(&self) -> Vec<(IntPoint<D>, E)>
    where
        E: Clone,
    {
        self.fold_local(Vec::new(), |mut acc, p, v| {
            if let Some(e) = v {
                acc.push((p, e.clone()));
            }
            acc
        })
    }
}
