use super::{Agent, AgentContext, AgentRole, AgentState, StopOutcome};
use crate::error::{AppResult, FleetError};
use crate::plan::TestPlan;
use crate::remote::RemoteAccess;
use crate::settings::OrchestratorSettings;
use crate::testing::{FakeConnector, HostScript, PLAN_ID, sample_plan};

const HOST: &str = "10.1.0.10";

struct Fixture {
    connector: FakeConnector,
    access: RemoteAccess,
    settings: OrchestratorSettings,
    plan: TestPlan,
}

impl Fixture {
    fn new(plan: TestPlan) -> Self {
        Self {
            connector: FakeConnector::default(),
            access: RemoteAccess::new("ubuntu"),
            settings: OrchestratorSettings::default(),
            plan,
        }
    }

    fn ctx(&self) -> AgentContext<'_> {
        AgentContext {
            connector: &self.connector,
            access: &self.access,
            tool_home: "/opt/jmeter",
            plan: &self.plan,
            settings: &self.settings,
            agent_count: 1,
        }
    }

    fn running_master(&self, pid: u32) -> Agent {
        self.connector.set_running(HOST, pid);
        let mut agent = provisioned(AgentRole::Master);
        agent.process_id = Some(pid);
        agent
    }
}

fn provisioned(role: AgentRole) -> Agent {
    let mut agent = Agent::new("agent-1", role, PLAN_ID);
    agent.public_address = Some(HOST.to_owned());
    agent.private_address = Some("172.16.0.10".to_owned());
    agent
}

#[test]
fn state_follows_address_and_pid() -> AppResult<()> {
    let mut agent = Agent::new("agent-1", AgentRole::Slave, PLAN_ID);
    if agent.state() != AgentState::NotProvisioned {
        return Err("Agent without address is not provisioned".into());
    }
    agent.private_address = Some("172.16.0.3".to_owned());
    if agent.state() != AgentState::Idle || agent.address() != Some("172.16.0.3") {
        return Err("Private address alone makes the agent reachable".into());
    }
    agent.process_id = Some(7);
    if agent.state() != AgentState::Running {
        return Err("Agent with pid is running".into());
    }
    agent.clear_addresses();
    if agent.state() != AgentState::NotProvisioned || agent.process_id.is_some() {
        return Err("Cleared agent must not look running".into());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn start_renders_master_command_with_slaves() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(100));
    let mut agent = provisioned(AgentRole::Master);
    let slaves = vec!["172.16.0.11".to_owned(), "172.16.0.12".to_owned()];

    agent.start(&fixture.ctx(), &slaves).await?;

    if agent.process_id.is_none() {
        return Err("Expected pid after start".into());
    }
    let commands = fixture.connector.commands(HOST);
    let command = commands.first().ok_or("Missing start command")?;
    if !command.starts_with("nohup /opt/jmeter/bin/jmeter -n -t /home/ubuntu/shop/app/") {
        return Err(format!("Unexpected command {command}").into());
    }
    if !command.contains("-R 172.16.0.11,172.16.0.12 -Djava.rmi.server.hostname=172.16.0.10") {
        return Err(format!("Missing slave list in {command}").into());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn start_fails_when_no_process_appears() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(10));
    fixture.connector.script(
        HOST,
        HostScript {
            start_fails: true,
            ..HostScript::default()
        },
    );
    let mut agent = provisioned(AgentRole::Slave);

    match agent.start(&fixture.ctx(), &[]).await {
        Err(FleetError::ProcessStartFailure { agent: id, address, .. }) => {
            if id != "agent-1" || address != HOST {
                return Err(format!("Unexpected failure target {id}@{address}").into());
            }
        }
        Err(other) => return Err(other.into()),
        Ok(()) => return Err("Expected start failure".into()),
    }
    if agent.process_id.is_some() {
        return Err("Failed start must not record a pid".into());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn start_launches_even_with_a_leftover_pid() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(10));
    let mut agent = provisioned(AgentRole::Master);
    agent.process_id = Some(4242);

    agent.start(&fixture.ctx(), &[]).await?;

    let commands = fixture.connector.commands(HOST);
    if commands.len() != 1 || !commands.iter().all(|command| command.starts_with("nohup ")) {
        return Err(format!("Expected one launch, got {commands:?}").into());
    }
    match agent.process_id {
        Some(pid) if pid != 4242 && fixture.connector.is_running(HOST) => Ok(()),
        other => Err(format!("Leftover pid must be replaced, got {other:?}").into()),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn start_without_address_is_rejected() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(10));
    let mut agent = Agent::new("agent-9", AgentRole::Master, PLAN_ID);
    let outcome = agent.start(&fixture.ctx(), &[]).await;
    if !matches!(outcome, Err(FleetError::MissingAddress { .. })) {
        return Err("Expected missing address".into());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn stop_without_wait_or_abort_is_refused() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(10));
    let mut agent = fixture.running_master(501);

    let outcome = agent.stop(&fixture.ctx(), false, false).await?;

    if outcome != StopOutcome::Refused {
        return Err(format!("Expected refusal, got {outcome:?}").into());
    }
    if agent.process_id != Some(501) {
        return Err("Refusal must keep the pid".into());
    }
    if !fixture.connector.commands(HOST).is_empty() {
        return Err("Refusal must not send any command".into());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn abort_sends_stop_then_force_terminates_survivor() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(10));
    fixture.connector.script(
        HOST,
        HostScript {
            ignores_stop: true,
            ..HostScript::default()
        },
    );
    let mut agent = fixture.running_master(502);

    let outcome = agent.stop(&fixture.ctx(), false, true).await?;

    if outcome != StopOutcome::Stopped {
        return Err(format!("Expected stop, got {outcome:?}").into());
    }
    if fixture.connector.commands(HOST) != vec!["/opt/jmeter/bin/shutdown.sh".to_owned()] {
        return Err("Expected exactly the stop command".into());
    }
    // one guard check, three retries, one final check
    if fixture.connector.liveness_checks(HOST) != 5 {
        return Err(format!(
            "Unexpected liveness checks {}",
            fixture.connector.liveness_checks(HOST)
        )
        .into());
    }
    if fixture.connector.terminated(HOST) != vec![502] {
        return Err("Expected forced termination".into());
    }
    if agent.process_id.is_some() {
        return Err("Pid must be cleared".into());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn looping_plan_is_always_stopped() -> AppResult<()> {
    for (wait, aborted) in [(false, false), (true, false), (false, true)] {
        let fixture = Fixture::new(sample_plan(10).looping(true));
        let mut agent = fixture.running_master(503);

        let outcome = agent.stop(&fixture.ctx(), wait, aborted).await?;

        if outcome != StopOutcome::Stopped || agent.process_id.is_some() {
            return Err(format!("wait={wait} aborted={aborted}: got {outcome:?}").into());
        }
        if fixture.connector.commands(HOST) != vec!["/opt/jmeter/bin/shutdown.sh".to_owned()] {
            return Err(format!("wait={wait} aborted={aborted}: stop command missing").into());
        }
        if !fixture.connector.terminated(HOST).is_empty() {
            return Err(format!("wait={wait} aborted={aborted}: graceful stop escalated").into());
        }
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn wait_polls_until_process_exits() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(10));
    fixture.connector.script(
        HOST,
        HostScript {
            exits_after_checks: Some(3),
            ..HostScript::default()
        },
    );
    let mut agent = fixture.running_master(504);

    let outcome = agent.stop(&fixture.ctx(), true, false).await?;

    if outcome != StopOutcome::Stopped || agent.process_id.is_some() {
        return Err("Expected the waited process to be cleared".into());
    }
    if !fixture.connector.commands(HOST).is_empty() {
        return Err("Waiting must not send the stop command".into());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn stop_after_exit_only_clears_pid() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(10));
    let mut agent = provisioned(AgentRole::Master);
    agent.process_id = Some(505);

    let outcome = agent.stop(&fixture.ctx(), false, false).await?;

    if outcome != StopOutcome::AlreadyStopped || agent.process_id.is_some() {
        return Err(format!("Unexpected outcome {outcome:?}").into());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn slave_stop_waits_for_propagated_shutdown() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(10));
    fixture.connector.script(
        HOST,
        HostScript {
            exits_after_checks: Some(1),
            ..HostScript::default()
        },
    );
    fixture.connector.set_running(HOST, 506);
    let mut agent = provisioned(AgentRole::Slave);
    agent.process_id = Some(506);

    let outcome = agent.stop(&fixture.ctx(), false, false).await?;

    if outcome != StopOutcome::Stopped || agent.process_id.is_some() {
        return Err("Slave stop must clear the pid".into());
    }
    if !fixture.connector.terminated(HOST).is_empty() {
        return Err("Slave exited on its own and must not be killed".into());
    }
    if !fixture.connector.commands(HOST).is_empty() {
        return Err("Slaves never receive the stop command directly".into());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn artifacts_sync_once_until_plan_changes() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(10));
    let mut agent = provisioned(AgentRole::Master);

    if !agent.upload_artifacts_if_needed(&fixture.ctx(), false).await? {
        return Err("First use must upload".into());
    }
    let directories = fixture.connector.directories(HOST);
    if directories.first().map(String::as_str) != Some("/home/ubuntu/shop") {
        return Err(format!("Unexpected directories {directories:?}").into());
    }
    if fixture.connector.uploads(HOST) != vec!["/home/ubuntu/shop/app/flows/checkout.jmx"] {
        return Err("Unexpected uploads".into());
    }
    if agent.first_use {
        return Err("First use must be cleared".into());
    }

    if agent.upload_artifacts_if_needed(&fixture.ctx(), false).await? {
        return Err("Unchanged plan must not upload".into());
    }

    agent.synced_hash = Some("outdated".to_owned());
    if !agent.upload_artifacts_if_needed(&fixture.ctx(), false).await? {
        return Err("Changed plan must upload".into());
    }
    if fixture.connector.directories(HOST).len() != directories.len() {
        return Err("Directories are only created on first use".into());
    }
    if fixture.connector.uploads(HOST).len() != 2 {
        return Err("Expected a second upload".into());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn check_running_reads_remote_state() -> AppResult<()> {
    let fixture = Fixture::new(sample_plan(10));
    let agent = fixture.running_master(507);
    if !agent.check_running(&fixture.ctx()).await? {
        return Err("Expected running".into());
    }
    let idle = provisioned(AgentRole::Master);
    if idle.check_running(&fixture.ctx()).await? {
        return Err("Agent without pid is never running".into());
    }
    Ok(())
}
