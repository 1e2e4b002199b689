use std::path::PathBuf;

use super::{DirectoryTree, TemplateVars, TestPlan, TestPlanDescriptor, render_command};
use crate::error::AppResult;

fn checkout_plan() -> TestPlan {
    TestPlan::new("shop", "flows/checkout", b"<jmeterTestPlan/>")
        .with_artifact(PathBuf::from("/work/app/flows/checkout.jmx"), "flows/checkout.jmx")
        .with_artifact(PathBuf::from("/work/app/data/users.csv"), "data/users.csv")
        .with_property("host", "shop.example.com")
        .with_thread_property("NumUsers", 100)
        .with_thread_property("NumAdmins", 5)
}

fn vars() -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.insert("user_home".to_owned(), "/home/ubuntu".to_owned());
    vars.insert("tool_home".to_owned(), "/opt/jmeter".to_owned());
    vars
}

#[test]
fn render_command_substitutes_known_keys_only() -> AppResult<()> {
    let rendered = render_command("{{tool_home}}/bin/x {{ user_home }} {{missing}} {{open", &vars());
    if rendered != "/opt/jmeter/bin/x /home/ubuntu {{missing}} {{open" {
        return Err(format!("Unexpected render {rendered}").into());
    }
    Ok(())
}

#[test]
fn num_threads_sums_or_takes_max() -> AppResult<()> {
    let plan = checkout_plan();
    if plan.num_threads() != 105 {
        return Err(format!("Expected 105 threads, got {}", plan.num_threads()).into());
    }
    let serialized = checkout_plan().serialize_thread_groups(true);
    if serialized.num_threads() != 100 {
        return Err("Serialized thread groups use the largest group".into());
    }
    Ok(())
}

#[test]
fn content_hash_tracks_plan_bytes() -> AppResult<()> {
    let plan = checkout_plan();
    let hash = plan.content_hash().to_owned();
    if hash.len() != 64 {
        return Err(format!("Expected sha256 hex digest, got {hash}").into());
    }
    if plan.content_changed(Some(&hash)) {
        return Err("Same hash must not count as changed".into());
    }
    if !plan.content_changed(None) || !plan.content_changed(Some("stale")) {
        return Err("Missing or stale hash must count as changed".into());
    }
    Ok(())
}

#[test]
fn master_command_in_flat_topology_splits_thread_properties() -> AppResult<()> {
    let plan = checkout_plan();
    let command = render_command(&plan.master_command_template("10.0.0.1", &[], 3), &vars());
    let expected = "nohup /opt/jmeter/bin/jmeter -n -t /home/ubuntu/shop/app/flows/checkout.jmx \
        -l /home/ubuntu/shop/log/results-flows-checkout.jtl -J\"NumAdmins=2\" -J\"NumUsers=33\" \
        -J\"host=shop.example.com\" 1>/dev/null 2>&1 </dev/null &";
    if command != expected {
        return Err(format!("Unexpected master command {command}").into());
    }
    Ok(())
}

#[test]
fn master_command_in_master_slave_topology_lists_slaves() -> AppResult<()> {
    let plan = checkout_plan();
    let slaves = vec!["10.0.0.2".to_owned(), "10.0.0.3".to_owned()];
    let command = plan.master_command_template("10.0.0.1", &slaves, 3);
    if !command.contains("-R 10.0.0.2,10.0.0.3 -Djava.rmi.server.hostname=10.0.0.1 -X") {
        return Err(format!("Missing remote start options: {command}").into());
    }
    if command.contains("-J\"") {
        return Err("Properties are passed to slaves, not the master".into());
    }
    Ok(())
}

#[test]
fn slave_command_runs_server_mode_from_plan_directory() -> AppResult<()> {
    let plan = checkout_plan();
    let command = render_command(&plan.slave_command_template("10.0.0.2", 200), &vars());
    if !command.starts_with("cd /home/ubuntu/shop/app/flows; nohup /opt/jmeter/bin/jmeter") {
        return Err(format!("Unexpected slave prefix {command}").into());
    }
    if !command.contains("-Dserver_port=1099 -s -Djava.rmi.server.hostname=10.0.0.2") {
        return Err("Missing server mode options".into());
    }
    if !command.contains("-J\"NumAdmins=1\"") {
        return Err("Thread share must never drop below one".into());
    }
    Ok(())
}

#[test]
fn directory_layout_lists_parents_first() -> AppResult<()> {
    let layout = checkout_plan().remote_directory_layout();
    let paths = layout.flatten("/home/ubuntu/");
    let expected = vec![
        "/home/ubuntu/shop",
        "/home/ubuntu/shop/app",
        "/home/ubuntu/shop/app/data",
        "/home/ubuntu/shop/app/flows",
        "/home/ubuntu/shop/log",
    ];
    if paths != expected {
        return Err(format!("Unexpected layout {paths:?}").into());
    }
    if !DirectoryTree::new().flatten("/root").is_empty() {
        return Err("Empty tree has no paths".into());
    }
    Ok(())
}

#[test]
fn load_reads_plan_from_app_root() -> AppResult<()> {
    let dir = tempfile::tempdir()?;
    std::fs::create_dir_all(dir.path().join("flows"))?;
    std::fs::write(dir.path().join("flows/browse.jmx"), b"<plan/>")?;

    let plan = TestPlan::load("shop", "flows/browse", dir.path())?;
    let artifact = plan.artifacts().first().ok_or("Missing plan artifact")?;
    if artifact.remote != "shop/app/flows/browse.jmx" {
        return Err(format!("Unexpected remote path {}", artifact.remote).into());
    }
    if TestPlan::load("shop", "flows/missing", dir.path()).is_ok() {
        return Err("Missing plan file must fail".into());
    }
    Ok(())
}
