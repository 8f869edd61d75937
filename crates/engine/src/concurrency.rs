//! Concurrency planning
//!
//! Decides how many transcodes run at once from the operator's request,
//! configuration, core count and encoder backend.

use crate::hardware::HardwareAccel;
use vidbatch_config::Config;

/// Concurrency plan for a local batch
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Logical CPU cores available
    pub total_cores: u32,
    pub hardware: HardwareAccel,
    /// Jobs allowed to run at once; always at least 1
    pub max_concurrent_jobs: u32,
}

impl ConcurrencyPlan {
    /// Derive a plan. A non-zero `requested` wins, then a non-zero
    /// `scheduler.max_concurrent_jobs`, then the core-count default.
    pub fn derive(cfg: &Config, requested: Option<u32>, hardware: HardwareAccel) -> Self {
        let total_cores = num_cpus::get() as u32;
        Self {
            total_cores,
            hardware,
            max_concurrent_jobs: resolve_max_concurrent(
                requested,
                cfg.scheduler.max_concurrent_jobs,
                total_cores,
                hardware,
            ),
        }
    }
}

/// Pick the job limit; see [`ConcurrencyPlan::derive`].
pub fn resolve_max_concurrent(
    requested: Option<u32>,
    configured: u32,
    cores: u32,
    hardware: HardwareAccel,
) -> u32 {
    match requested {
        Some(n) if n > 0 => n,
        _ if configured > 0 => configured,
        _ => derive_max_jobs(cores, hardware),
    }
}

/// Default job count
/// - 2 for a hardware encoder
/// - one per 8 cores for software, between 1 and 4
fn derive_max_jobs(cores: u32, hardware: HardwareAccel) -> u32 {
    match hardware {
        HardwareAccel::Nvidia | HardwareAccel::Intel => 2,
        HardwareAccel::Software => (cores / 8).clamp(1, 4),
    }
}
