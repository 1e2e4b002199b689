use crate::cluster::ClusterSpec;
use crate::config::FleetSetup;

/// Human-readable summary of what `run` would set up, one line per item.
#[must_use]
pub fn describe_setup(setup: &FleetSetup) -> String {
    let topology = if setup.master_slave {
        "master/slave"
    } else {
        "flat"
    };
    let plans: Vec<&str> = setup.plan_names().collect();
    let mut lines = vec![
        format!("project {} ({})", setup.project, topology),
        format!("plans: {}", plans.join(", ")),
    ];
    lines.extend(setup.clusters.iter().map(describe_cluster));
    lines.join("\n")
}

fn describe_cluster(spec: &ClusterSpec) -> String {
    let detail = match spec {
        ClusterSpec::Cloud(cloud) => format!(
            "{}, {} threads per agent, user {}",
            cloud.instance_type,
            cloud.max_threads_per_agent(),
            cloud.user_name
        ),
        ClusterSpec::DataCenter(site) => format!(
            "{} machine(s), user {}, port {}",
            site.machines.len(),
            site.user_name,
            site.port
        ),
    };
    let inactive = if spec.is_active() { "" } else { " [inactive]" };
    format!("cluster {} {}: {}{}", spec.kind(), spec.identity(), detail, inactive)
}
