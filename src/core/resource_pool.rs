//! Resource pool with capacity accounting and deterministic placement.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::core::SchedulerError;
use crate::util::ResourceId;

/// An execution unit with finite capacity.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Resource {
    /// Resource identifier.
    pub id: ResourceId,
    /// Total units this resource can hold.
    pub capacity: u32,
    /// Units currently reserved.
    pub load: u32,
    /// `load / capacity`, refreshed on every mutation.
    pub utilization: f64,
}

impl Resource {
    /// Create an empty resource.
    pub fn new(id: impl Into<ResourceId>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            capacity,
            load: 0,
            utilization: 0.0,
        }
    }

    /// Units still free.
    pub const fn free(&self) -> u32 {
        self.capacity.saturating_sub(self.load)
    }

    fn set_load(&mut self, load: u32) {
        self.load = load;
        self.utilization = if self.capacity == 0 {
            0.0
        } else {
            f64::from(load) / f64::from(self.capacity)
        };
    }
}

/// Units held on a resource after a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Resource holding the units.
    pub resource_id: ResourceId,
    /// Units held.
    pub units: u32,
}

/// Tracks resources and their load.
///
/// All mutations go through one `parking_lot::Mutex`, so a select followed by a
/// reserve can be done as a single critical section (`select_and_reserve`).
#[derive(Debug, Default)]
pub struct ResourcePool {
    resources: Mutex<BTreeMap<ResourceId, Resource>>,
}

impl ResourcePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool from validated configuration.
    pub fn from_config(cfg: &PoolConfig) -> Result<Self, SchedulerError> {
        cfg.validate().map_err(SchedulerError::InvalidConfig)?;
        let pool = Self::new();
        for res in &cfg.resources {
            pool.add_resource(res.id.clone(), res.capacity)?;
        }
        Ok(pool)
    }

    /// Register a new resource. Ids must be unique and capacity non-zero.
    pub fn add_resource(&self, id: impl Into<ResourceId>, capacity: u32) -> Result<(), SchedulerError> {
        let id = id.into();
        if capacity == 0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "resource `{id}` must have capacity > 0"
            )));
        }
        let mut resources = self.resources.lock();
        if resources.contains_key(&id) {
            return Err(SchedulerError::InvalidConfig(format!(
                "duplicate resource `{id}`"
            )));
        }
        tracing::debug!(resource = %id, capacity, "resource registered");
        resources.insert(id.clone(), Resource::new(id, capacity));
        Ok(())
    }

    /// Choose the resource with the lowest utilization among those with at
    /// least `cost` free units. Ties go to the smallest id. `None` means no
    /// capacity, which callers treat as a normal outcome.
    pub fn select(&self, cost: u32) -> Option<ResourceId> {
        let resources = self.resources.lock();
        Self::select_locked(&resources, cost)
    }

    fn select_locked(resources: &BTreeMap<ResourceId, Resource>, cost: u32) -> Option<ResourceId> {
        // BTreeMap iterates by id and `min_by` keeps the first of equal minima.
        resources
            .values()
            .filter(|r| r.free() >= cost)
            .min_by(|a, b| a.utilization.total_cmp(&b.utilization))
            .map(|r| r.id.clone())
    }

    /// Reserve `amount` units on `resource`.
    pub fn reserve(&self, resource: &str, amount: u32) -> Result<Reservation, SchedulerError> {
        let mut resources = self.resources.lock();
        Self::reserve_locked(&mut resources, resource, amount)
    }

    fn reserve_locked(
        resources: &mut BTreeMap<ResourceId, Resource>,
        resource: &str,
        amount: u32,
    ) -> Result<Reservation, SchedulerError> {
        let res = resources
            .get_mut(resource)
            .ok_or_else(|| SchedulerError::UnknownResource(resource.to_string()))?;
        if amount > res.free() {
            return Err(SchedulerError::OverCommit {
                resource: resource.to_string(),
                requested: amount,
                available: res.free(),
            });
        }
        res.set_load(res.load + amount);
        tracing::debug!(resource, amount, load = res.load, "reserved");
        Ok(Reservation {
            resource_id: res.id.clone(),
            units: amount,
        })
    }

    /// Select a resource and reserve `cost` units on it in one critical section.
    pub fn select_and_reserve(&self, cost: u32) -> Result<Option<Reservation>, SchedulerError> {
        let mut resources = self.resources.lock();
        match Self::select_locked(&resources, cost) {
            Some(id) => Self::reserve_locked(&mut resources, &id, cost).map(Some),
            None => Ok(None),
        }
    }

    /// Release `amount` units from `resource`.
    ///
    /// Load is clamped at zero. Releasing more than is held still clamps, but
    /// is reported as `ReleaseMismatch`.
    pub fn release(&self, resource: &str, amount: u32) -> Result<(), SchedulerError> {
        let mut resources = self.resources.lock();
        let res = resources
            .get_mut(resource)
            .ok_or_else(|| SchedulerError::UnknownResource(resource.to_string()))?;
        let held = res.load;
        res.set_load(held.saturating_sub(amount));
        tracing::debug!(resource, amount, load = res.load, "released");
        if amount > held {
            tracing::error!(resource, amount, held, "release exceeds reservation");
            return Err(SchedulerError::ReleaseMismatch {
                resource: resource.to_string(),
                released: amount,
                held,
            });
        }
        Ok(())
    }

    /// Release a reservation previously returned by this pool.
    pub fn release_reservation(&self, reservation: &Reservation) -> Result<(), SchedulerError> {
        self.release(&reservation.resource_id, reservation.units)
    }

    /// Snapshot of resource id to utilization ratio.
    pub fn utilization(&self) -> BTreeMap<ResourceId, f64> {
        self.resources
            .lock()
            .values()
            .map(|r| (r.id.clone(), r.utilization))
            .collect()
    }

    /// Snapshot of all resources.
    pub fn resources(&self) -> Vec<Resource> {
        self.resources.lock().values().cloned().collect()
    }

    /// Current load of a resource.
    pub fn load(&self, resource: &str) -> Option<u32> {
        self.resources.lock().get(resource).map(|r| r.load)
    }

    /// Largest single-resource capacity, or 0 for an empty pool.
    pub fn max_capacity(&self) -> u32 {
        self.resources
            .lock()
            .values()
            .map(|r| r.capacity)
            .max()
            .unwrap_or(0)
    }

    /// Sum of all loads.
    pub fn total_load(&self) -> u64 {
        self.resources
            .lock()
            .values()
            .map(|r| u64::from(r.load))
            .sum()
    }
}
