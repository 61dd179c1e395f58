use fleetmon_common::types::{CounterSample, CpuPercent, NetworkCounters, RateMetric};

/// Share of host CPU consumed between two readings of one usage counter,
/// scaled by the number of cores.
///
/// Returns 0 unless both the usage delta and the system delta are strictly
/// positive, so counter resets and zero-length intervals never yield negative
/// or infinite values.
///
/// # Examples
///
/// ```
/// use fleetmon_collector::delta::cpu_percent;
///
/// assert_eq!(cpu_percent(100, 150, 1000, 1100, 4), 2.0);
/// assert_eq!(cpu_percent(150, 100, 1000, 1100, 4), 0.0);
/// assert_eq!(cpu_percent(100, 150, 1100, 1100, 4), 0.0);
/// ```
pub fn cpu_percent(
    prev_usage: u64,
    curr_usage: u64,
    prev_system: u64,
    curr_system: u64,
    core_count: u32,
) -> f64 {
    let usage_delta = curr_usage.saturating_sub(prev_usage);
    let system_delta = curr_system.saturating_sub(prev_system);
    if usage_delta == 0 || system_delta == 0 {
        return 0.0;
    }
    (usage_delta as f64 / system_delta as f64) * f64::from(core_count)
}

/// Pairs two samples of the same container into a [`RateMetric`].
///
/// `prev` must have been observed before `curr`. Cumulative CPU counters are
/// turned into percentages, cumulative network bytes into the bytes moved
/// between the samples, and memory values are taken from `curr` as-is.
pub fn rate(prev: &CounterSample, curr: &CounterSample) -> RateMetric {
    let percent = |p: u64, c: u64| {
        cpu_percent(p, c, prev.system_cpu, curr.system_cpu, curr.core_count)
    };

    RateMetric {
        observed_at: curr.observed_at,
        cpu_percent: CpuPercent {
            total: percent(prev.cpu.total, curr.cpu.total),
            user_mode: percent(prev.cpu.user_mode, curr.cpu.user_mode),
            kernel_mode: percent(prev.cpu.kernel_mode, curr.cpu.kernel_mode),
        },
        cpu: curr.cpu,
        system_cpu: curr.system_cpu,
        core_count: curr.core_count,
        memory: curr.memory,
        network: curr.network,
        bandwidth: NetworkCounters {
            rx_bytes: curr.network.rx_bytes.saturating_sub(prev.network.rx_bytes),
            tx_bytes: curr.network.tx_bytes.saturating_sub(prev.network.tx_bytes),
        },
    }
}
