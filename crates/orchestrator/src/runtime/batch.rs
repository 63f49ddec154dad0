//! Cloud Batch resource sizing.
//!
//! Turns worker counts and per-worker resource knobs into a machine shape,
//! rewriting under-sized machine types to `n2d-custom-{vcpu}-{memory}` and
//! flagging custom shapes whose memory is below the computed requirement.

use serde::Serialize;

/// A standard `e2-standard-2`: the shape the rewrite rule compares against.
const STANDARD_VCPU: u32 = 2;
const STANDARD_MEMORY_MB: u32 = 8192;
const DEFAULT_MACHINE: &str = "e2-standard-2";

/// Memory floor applied when a custom machine is overridden for being
/// under-sized.
const OVERRIDE_MEMORY_FLOOR_MB: u32 = 10_240;

/// Inputs to the sizing computation, resolved from targeting overrides,
/// properties, and config defaults by the caller.
#[derive(Clone, Debug)]
pub struct BatchInputs {
    pub workers: u32,
    pub parallelism: u32,
    pub instance_count: Option<u32>,
    pub vcpu_per_worker: Option<u32>,
    pub memory_per_worker_mb: Option<u32>,
    pub memory_buffer_mb: Option<u32>,
    /// Machine type from config/targeting; empty means "size from resources".
    pub configured_machine: String,
    /// Operator machine-type override property; used verbatim when set.
    pub machine_override: Option<String>,
    pub max_parallelism: u32,
    pub max_attempts: Option<u32>,
    pub prefer_spot: bool,
    pub allow_on_demand_fallback: bool,
    pub workers_per_workflow: Option<u32>,
    pub signed_url_ttl_hours: u32,
    pub signed_url_refresh_threshold_seconds: u32,
}

/// The `batch` block attached to dispatcher payloads.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchPlan {
    pub enabled: bool,
    pub max_parallelism: u32,
    pub prefer_spot: bool,
    pub allow_on_demand_fallback: bool,
    pub machine_type: String,
    pub signed_url_ttl_hours: u32,
    pub signed_url_refresh_threshold_seconds: u32,
    pub vcpu_per_worker: u32,
    pub memory_per_worker_mb: u32,
    pub memory_buffer_mb: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_count: Option<u32>,
    pub workers_per_workflow: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub memory_warning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_memory_mb: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_machine_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_machine_type: Option<String>,
}

/// Round up to the next multiple of 256 MB.
pub fn ceil_to_256(mb: u32) -> u32 {
    mb.div_ceil(256) * 256
}

/// Parse `…custom-{vcpu}-{memory}` machine names (any family prefix).
pub fn parse_custom_machine(machine: &str) -> Option<(u32, u32)> {
    let parts: Vec<&str> = machine.split('-').collect();
    let custom_at = parts.iter().position(|p| *p == "custom")?;
    let vcpu: u32 = parts.get(custom_at + 1)?.parse().ok()?;
    let memory: u32 = parts.get(custom_at + 2)?.parse().ok()?;
    Some((vcpu, memory))
}

/// Clamp a signed-URL TTL override into 1..=168 hours.
pub fn clamp_ttl_hours(hours: u32) -> u32 {
    hours.clamp(1, 168)
}

/// Clamp a refresh threshold into 60..=604 800 seconds.
pub fn clamp_refresh_threshold(seconds: u32) -> u32 {
    seconds.clamp(60, 604_800)
}

/// Compute the full batch plan.
pub fn build(inputs: &BatchInputs) -> BatchPlan {
    let workers = inputs.workers.max(1);
    let vcpu_per_worker = inputs.vcpu_per_worker.unwrap_or(1).max(1);
    let memory_per_worker_mb = inputs
        .memory_per_worker_mb
        .unwrap_or(2048)
        .max(1024)
        .max(2048);
    let memory_buffer_mb = inputs.memory_buffer_mb.unwrap_or(2048);

    let total_vcpu = workers * vcpu_per_worker;
    let total_memory_mb = ceil_to_256(workers * memory_per_worker_mb + memory_buffer_mb);

    // ── Machine selection ────────────────────────────────────────────
    let configured = inputs.configured_machine.trim();
    let mut requested_machine_type = None;
    let mut machine_type = if let Some(override_machine) = inputs
        .machine_override
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
    {
        override_machine.to_owned()
    } else if (configured.is_empty() || configured == DEFAULT_MACHINE)
        && (total_vcpu > STANDARD_VCPU || total_memory_mb > STANDARD_MEMORY_MB)
    {
        if !configured.is_empty() {
            requested_machine_type = Some(configured.to_owned());
        }
        format!("n2d-custom-{total_vcpu}-{total_memory_mb}")
    } else if configured.is_empty() {
        DEFAULT_MACHINE.to_owned()
    } else {
        configured.to_owned()
    };

    // ── Custom-shape memory check ────────────────────────────────────
    let mut memory_warning = false;
    let mut fallback_machine_type = None;
    if let Some((_, custom_memory)) = parse_custom_machine(&machine_type) {
        if custom_memory < total_memory_mb {
            let fallback = format!(
                "n2d-custom-{}-{}",
                total_vcpu.max(4),
                ceil_to_256(total_memory_mb.max(OVERRIDE_MEMORY_FLOOR_MB)),
            );
            requested_machine_type.get_or_insert_with(|| machine_type.clone());
            fallback_machine_type = Some(fallback.clone());
            machine_type = fallback;
            memory_warning = true;
        }
    }

    // ── Parallelism / attempts ───────────────────────────────────────
    let configured_max = inputs.max_parallelism.max(1);
    let instance_count = inputs.instance_count.map(|n| n.clamp(1, 16));
    let max_parallelism = configured_max
        .min(inputs.parallelism.max(1))
        .min(configured_max.max(instance_count.unwrap_or(0)))
        .max(1);

    BatchPlan {
        enabled: true,
        max_parallelism,
        prefer_spot: inputs.prefer_spot,
        allow_on_demand_fallback: inputs.allow_on_demand_fallback,
        machine_type,
        signed_url_ttl_hours: clamp_ttl_hours(inputs.signed_url_ttl_hours),
        signed_url_refresh_threshold_seconds: clamp_refresh_threshold(
            inputs.signed_url_refresh_threshold_seconds,
        ),
        vcpu_per_worker,
        memory_per_worker_mb,
        memory_buffer_mb,
        max_attempts: inputs.max_attempts.unwrap_or(3).max(1),
        instance_count,
        workers_per_workflow: inputs.workers_per_workflow.unwrap_or(workers).clamp(1, 16),
        memory_warning,
        computed_memory_mb: Some(total_memory_mb),
        fallback_machine_type,
        requested_machine_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> BatchInputs {
        BatchInputs {
            workers: 4,
            parallelism: 4,
            instance_count: None,
            vcpu_per_worker: Some(1),
            memory_per_worker_mb: Some(2048),
            memory_buffer_mb: Some(2048),
            configured_machine: DEFAULT_MACHINE.into(),
            machine_override: None,
            max_parallelism: 8,
            max_attempts: None,
            prefer_spot: true,
            allow_on_demand_fallback: true,
            workers_per_workflow: None,
            signed_url_ttl_hours: 48,
            signed_url_refresh_threshold_seconds: 21_600,
        }
    }

    #[test]
    fn ceil_256_boundaries() {
        assert_eq!(ceil_to_256(0), 0);
        assert_eq!(ceil_to_256(1), 256);
        assert_eq!(ceil_to_256(256), 256);
        assert_eq!(ceil_to_256(257), 512);
        assert_eq!(ceil_to_256(10_200), 10_240);
    }

    #[test]
    fn custom_machine_parsing() {
        assert_eq!(parse_custom_machine("custom-4-8192"), Some((4, 8192)));
        assert_eq!(parse_custom_machine("n2d-custom-4-10240"), Some((4, 10240)));
        assert_eq!(parse_custom_machine("e2-standard-2"), None);
        assert_eq!(parse_custom_machine("custom-x-y"), None);
    }

    #[test]
    fn undersized_standard_machine_is_rewritten() {
        // 4 workers × 2048 MB + 2048 buffer = 10 240 MB, 4 vCPU — beyond
        // the 2 vCPU / 8192 MB standard shape.
        let plan = build(&inputs());
        assert_eq!(plan.machine_type, "n2d-custom-4-10240");
        assert!(!plan.memory_warning);
        assert_eq!(plan.computed_memory_mb, Some(10_240));
        assert_eq!(plan.requested_machine_type.as_deref(), Some(DEFAULT_MACHINE));
    }

    #[test]
    fn fitting_workload_keeps_standard_machine() {
        let mut i = inputs();
        i.workers = 1;
        i.memory_buffer_mb = Some(0);
        i.vcpu_per_worker = Some(2);
        // 1 × 2048 + 0 = 2048 MB, 2 vCPU — fits e2-standard-2.
        let plan = build(&i);
        assert_eq!(plan.machine_type, DEFAULT_MACHINE);
        assert!(plan.requested_machine_type.is_none());
    }

    #[test]
    fn undersized_custom_machine_gets_memory_warning() {
        let mut i = inputs();
        i.configured_machine = "custom-4-8192".into();
        let plan = build(&i);
        assert_eq!(plan.machine_type, "n2d-custom-4-10240");
        assert!(plan.memory_warning);
        assert_eq!(plan.fallback_machine_type.as_deref(), Some("n2d-custom-4-10240"));
        assert_eq!(plan.requested_machine_type.as_deref(), Some("custom-4-8192"));
    }

    #[test]
    fn custom_override_memory_floor_is_10240() {
        let mut i = inputs();
        i.workers = 2;
        i.memory_buffer_mb = Some(0);
        i.configured_machine = "custom-2-2048".into();
        // Total = ceil256(2 × 2048) = 4096; the custom shape is under-sized,
        // and the fallback floors at 10 240 with at least 4 vCPU.
        let plan = build(&i);
        assert_eq!(plan.machine_type, "n2d-custom-4-10240");
        assert!(plan.memory_warning);
    }

    #[test]
    fn operator_override_is_used_verbatim() {
        let mut i = inputs();
        i.machine_override = Some("n2-standard-8".into());
        let plan = build(&i);
        assert_eq!(plan.machine_type, "n2-standard-8");
        assert!(!plan.memory_warning);
    }

    #[test]
    fn memory_floor_per_worker_is_2048() {
        let mut i = inputs();
        i.memory_per_worker_mb = Some(1024);
        let plan = build(&i);
        assert_eq!(plan.memory_per_worker_mb, 2048);
    }

    #[test]
    fn parallelism_clamps() {
        let mut i = inputs();
        i.parallelism = 12;
        i.max_parallelism = 8;
        assert_eq!(build(&i).max_parallelism, 8);

        i.parallelism = 3;
        assert_eq!(build(&i).max_parallelism, 3);

        i.parallelism = 0;
        assert_eq!(build(&i).max_parallelism, 1);
    }

    #[test]
    fn instance_count_and_workers_clamped_to_16() {
        let mut i = inputs();
        i.instance_count = Some(40);
        i.workers_per_workflow = Some(64);
        let plan = build(&i);
        assert_eq!(plan.instance_count, Some(16));
        assert_eq!(plan.workers_per_workflow, 16);
    }

    #[test]
    fn ttl_and_refresh_clamps() {
        assert_eq!(clamp_ttl_hours(0), 1);
        assert_eq!(clamp_ttl_hours(48), 48);
        assert_eq!(clamp_ttl_hours(500), 168);
        assert_eq!(clamp_refresh_threshold(10), 60);
        assert_eq!(clamp_refresh_threshold(21_600), 21_600);
        assert_eq!(clamp_refresh_threshold(1_000_000), 604_800);
    }

    #[test]
    fn attempts_floor_at_one() {
        let mut i = inputs();
        i.max_attempts = Some(0);
        assert_eq!(build(&i).max_attempts, 1);
        i.max_attempts = None;
        assert_eq!(build(&i).max_attempts, 3);
    }
}
