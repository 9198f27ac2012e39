//! Resource accounting for scale decisions.
//!
//! Cluster budget dimensions configured as zero or negative are unlimited;
//! that is encoded as `None` in [`Capacity`] so every allocator boundary has
//! to handle it explicitly. The subtractor clamps, the allocator interprets.

use crate::common::{Error, Result};
use crate::domains::endpoints::ResourceRecipe;

/// A concrete amount of resources (one replica, or a running total).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Resources {
    pub gpus: f64,
    pub cpu_cores: f64,
    pub memory_gb: f64,
}

impl Resources {
    pub fn scaled(&self, replicas: i32) -> Resources {
        let n = replicas.max(0) as f64;
        Resources {
            gpus: self.gpus * n,
            cpu_cores: self.cpu_cores * n,
            memory_gb: self.memory_gb * n,
        }
    }

    pub fn add(&mut self, other: &Resources) {
        self.gpus += other.gpus;
        self.cpu_cores += other.cpu_cores;
        self.memory_gb += other.memory_gb;
    }

    pub fn subtract(&mut self, other: &Resources) {
        self.gpus = (self.gpus - other.gpus).max(0.0);
        self.cpu_cores = (self.cpu_cores - other.cpu_cores).max(0.0);
        self.memory_gb = (self.memory_gb - other.memory_gb).max(0.0);
    }
}

/// Cluster-wide limits; `None` means the dimension is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Capacity {
    pub gpus: Option<f64>,
    pub cpu_cores: Option<f64>,
    pub memory_gb: Option<f64>,
}

impl Capacity {
    /// Build from raw config values; anything `<= 0` is unlimited.
    pub fn from_limits(gpus: f64, cpu_cores: f64, memory_gb: f64) -> Self {
        let limit = |v: f64| if v > 0.0 { Some(v) } else { None };
        Self {
            gpus: limit(gpus),
            cpu_cores: limit(cpu_cores),
            memory_gb: limit(memory_gb),
        }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// Totals, usage, and the allocation check consuming `used` as decisions are
/// approved within a pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterResources {
    pub total: Capacity,
    pub used: Resources,
}

impl ClusterResources {
    pub fn new(total: Capacity, used: Resources) -> Self {
        Self { total, used }
    }

    /// Total minus used, clamped at zero per dimension; unlimited stays
    /// `None`.
    pub fn available(&self) -> Capacity {
        let avail = |total: Option<f64>, used: f64| total.map(|t| (t - used).max(0.0));
        Capacity {
            gpus: avail(self.total.gpus, self.used.gpus),
            cpu_cores: avail(self.total.cpu_cores, self.used.cpu_cores),
            memory_gb: avail(self.total.memory_gb, self.used.memory_gb),
        }
    }

    /// Every dimension either unlimited or with enough headroom.
    pub fn can_allocate(&self, required: &Resources) -> bool {
        let avail = self.available();
        let fits = |a: Option<f64>, r: f64| a.map_or(true, |a| a + 1e-9 >= r);
        fits(avail.gpus, required.gpus)
            && fits(avail.cpu_cores, required.cpu_cores)
            && fits(avail.memory_gb, required.memory_gb)
    }

    /// Consume an approved allocation.
    pub fn commit(&mut self, required: &Resources) {
        self.used.add(required);
    }

    /// Return a freed allocation (preemption victim scale-down).
    pub fn release(&mut self, freed: &Resources) {
        self.used.subtract(freed);
    }
}

// ============================================================================
// Recipe parsing
// ============================================================================

/// Parse a CPU quantity: "4" cores or "4000m" millicores.
pub fn parse_cpu_cores(raw: &str) -> Result<f64> {
    let s = raw.trim();
    if let Some(milli) = s.strip_suffix('m') {
        let value: f64 = milli
            .parse()
            .map_err(|_| Error::Internal(format!("invalid cpu quantity: {raw}")))?;
        return Ok(value / 1000.0);
    }
    s.parse()
        .map_err(|_| Error::Internal(format!("invalid cpu quantity: {raw}")))
}

/// Parse a memory quantity into gigabytes: "8Gi", "8GB", "8G", "8192Mi",
/// "8192MB", or a bare number of GB.
pub fn parse_memory_gb(raw: &str) -> Result<f64> {
    let s = raw.trim();
    let (digits, divisor) = if let Some(v) = s.strip_suffix("Gi") {
        (v, 1.0)
    } else if let Some(v) = s.strip_suffix("GB") {
        (v, 1.0)
    } else if let Some(v) = s.strip_suffix('G') {
        (v, 1.0)
    } else if let Some(v) = s.strip_suffix("Mi") {
        (v, 1024.0)
    } else if let Some(v) = s.strip_suffix("MB") {
        (v, 1000.0)
    } else if let Some(v) = s.strip_suffix('M') {
        (v, 1000.0)
    } else {
        (s, 1.0)
    };

    let value: f64 = digits
        .trim()
        .parse()
        .map_err(|_| Error::Internal(format!("invalid memory quantity: {raw}")))?;
    Ok(value / divisor)
}

/// Per-replica resources of a recipe.
pub fn recipe_resources(recipe: &ResourceRecipe) -> Result<Resources> {
    Ok(Resources {
        gpus: recipe.gpu_count.max(0) as f64,
        cpu_cores: parse_cpu_cores(&recipe.cpu_cores)?,
        memory_gb: parse_memory_gb(&recipe.memory)?,
    })
}
