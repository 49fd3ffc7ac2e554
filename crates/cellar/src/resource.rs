use std::fmt;

use serde::{Deserialize, Serialize};

use crate::exception::{ExcType, Exception, RunError};

/// Number of allocations between collections when the tracker does not configure an interval.
pub const DEFAULT_GC_INTERVAL: usize = 100_000;

/// Error returned when a resource limit is exceeded during allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum memory usage exceeded.
    Memory { limit: usize, used: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Memory { limit, used } => {
                write!(f, "memory limit exceeded: {used} bytes > {limit} bytes")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<ResourceError> for RunError {
    /// Allocation failures are always fatal to the current operation, so they never
    /// become catchable script errors.
    fn from(err: ResourceError) -> Self {
        Self::UncatchableExc(Box::new(Exception::new_msg(ExcType::MemoryError, err)))
    }
}

/// When and how the collector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcPolicy {
    /// Run a collection every N allocations; `None` uses [`DEFAULT_GC_INTERVAL`].
    pub interval: Option<usize>,
    /// Slide surviving cells to the front of the arena after each sweep,
    /// rewriting every reference to them.
    pub compact: bool,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            interval: None,
            compact: true,
        }
    }
}

impl GcPolicy {
    /// Collect (and compact) on every single allocation.
    ///
    /// Exercises every path that must tolerate relocation.
    #[must_use]
    pub fn stress() -> Self {
        Self {
            interval: Some(1),
            compact: true,
        }
    }

    pub(crate) fn effective_interval(self) -> usize {
        self.interval.unwrap_or(DEFAULT_GC_INTERVAL).max(1)
    }
}

/// Trait for tracking resource usage and scheduling garbage collection.
///
/// Implementations can enforce limits on allocations and memory, and choose
/// how often the collector runs.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation.
    ///
    /// Returns `Ok(())` if the allocation should proceed, or `Err(ResourceError)`
    /// if a limit would be exceeded.
    ///
    /// # Arguments
    /// * `get_size` - Computes the approximate size in bytes of the allocation
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called before a new entry is appended to an existing collection.
    ///
    /// Collection growth still counts against the allocation budget so a script
    /// cannot grow one map without bound. The default routes through
    /// [`Self::on_allocate`] with a zero-byte estimate.
    fn on_container_insert(&mut self) -> Result<(), ResourceError> {
        self.on_allocate(|| 0)
    }

    /// Called when the collector frees a cell.
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Collection schedule for heaps driven by this tracker.
    fn gc_policy(&self) -> GcPolicy {
        GcPolicy::default()
    }

    /// Returns the total number of allocations tracked, if this tracker records them.
    fn allocation_count(&self) -> Option<usize> {
        None
    }

    /// Returns the current approximate memory usage in bytes, if tracked.
    fn current_memory_bytes(&self) -> Option<usize> {
        None
    }
}

/// Tracker that never rejects an allocation and uses the default collection schedule.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_container_insert(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}
}

/// Configuration for resource limits.
///
/// All limits are optional - set to `None` to disable a specific limit.
/// Use `ResourceLimits::default()` for no limits, or build custom limits
/// with the builder methods.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of heap allocations (including collection inserts).
    pub max_allocations: Option<usize>,
    /// Maximum heap memory in bytes (approximate).
    pub max_memory: Option<usize>,
    /// Collection schedule.
    #[serde(default)]
    pub gc: GcPolicy,
}

impl ResourceLimits {
    /// Creates limits with everything disabled and the default collection schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of allocations.
    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    /// Sets the maximum memory usage in bytes.
    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    /// Sets the garbage collection interval (run GC every N allocations).
    #[must_use]
    pub fn gc_interval(mut self, interval: usize) -> Self {
        self.gc.interval = Some(interval);
        self
    }

    /// Enables or disables compaction after each sweep.
    #[must_use]
    pub fn gc_compact(mut self, compact: bool) -> Self {
        self.gc.compact = compact;
        self
    }

    /// Replaces the whole collection schedule.
    #[must_use]
    pub fn gc_policy(mut self, policy: GcPolicy) -> Self {
        self.gc = policy;
        self
    }
}

/// A resource tracker that enforces configurable limits.
///
/// Tracks allocation count and memory usage, returning errors when limits are
/// exceeded, and schedules collection according to [`ResourceLimits::gc`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    /// Total number of allocations made.
    allocation_count: usize,
    /// Current approximate memory usage in bytes.
    current_memory: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            allocation_count: 0,
            current_memory: 0,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Returns the current approximate memory usage.
    #[must_use]
    pub fn current_memory(&self) -> usize {
        self.current_memory
    }

    fn check_allocation_count(&self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }
        Ok(())
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        self.check_allocation_count()?;

        let size = get_size();
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory.saturating_add(size);
            if new_memory > max {
                return Err(ResourceError::Memory {
                    limit: max,
                    used: new_memory,
                });
            }
        }

        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_container_insert(&mut self) -> Result<(), ResourceError> {
        self.check_allocation_count()?;
        self.allocation_count += 1;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.current_memory = self.current_memory.saturating_sub(get_size());
    }

    fn gc_policy(&self) -> GcPolicy {
        self.limits.gc
    }

    fn allocation_count(&self) -> Option<usize> {
        Some(self.allocation_count)
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        Some(self.current_memory)
    }
}
