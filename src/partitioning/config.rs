//! World extent, area of interest and wrap mode shared by every partition.

use crate::partitioning::error::PartitionError;
use crate::topology::rect::IntRect;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartitionConfig<const D: usize> {
    /// Global field size per axis.
    pub extent: [i64; D],
    /// Halo depth per axis.
    pub aoi: [i64; D],
    /// Whether coordinates wrap around the world edges.
    pub toroidal: bool,
}

impl<const D: usize> PartitionConfig<D> {
    /// Bounded world with no halo.
    pub fn new(extent: [i64; D]) -> Self {
        PartitionConfig {
            extent,
            aoi: [0; D],
            toroidal: false,
        }
    }

    pub fn with_aoi(mut self, aoi: [i64; D]) -> Self {
        self.aoi = aoi;
        self
    }

    pub fn toroidal(mut self, toroidal: bool) -> Self {
        self.toroidal = toroidal;
        self
    }

    pub fn world(&self) -> IntRect<D> {
        IntRect::from_extent(self.extent)
    }

    pub fn validate(&self) -> Result<(), PartitionError> {
        if D == 0 {
            return Err(PartitionError::InvalidConfig("zero-dimensional world".into()));
        }
        if let Some(d) = (0..D).find(|&d| self.extent[d] <= 0) {
            return Err(PartitionError::InvalidConfig(format!(
                "extent {:?} is not positive along axis {d}",
                self.extent
            )));
        }
        if let Some(d) = (0..D).find(|&d| self.aoi[d] < 0) {
            return Err(PartitionError::InvalidConfig(format!(
                "aoi {:?} is negative along axis {d}",
                self.aoi
            )));
        }
        Ok(())
    }
}
