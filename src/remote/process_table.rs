//! Parsing of `ps -o pid,ppid,cmd` output.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProcess {
    pub pid: u32,
    pub ppid: u32,
    pub cmd: String,
}

/// Command that produces the table parsed by `parse`.
#[must_use]
pub fn listing_command(user_name: &str) -> String {
    format!("ps -o pid,ppid,cmd -u {}", user_name)
}

/// Parses a process listing. The header and any line that does not start with
/// two numeric columns followed by a command are skipped.
#[must_use]
pub fn parse(output: &str) -> Vec<RemoteProcess> {
    output.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<RemoteProcess> {
    let line = line.trim();
    let (pid, rest) = line.split_once(char::is_whitespace)?;
    let (ppid, cmd) = rest.trim_start().split_once(char::is_whitespace)?;
    let cmd = cmd.trim();
    if cmd.is_empty() {
        return None;
    }
    Some(RemoteProcess {
        pid: pid.parse().ok()?,
        ppid: ppid.parse().ok()?,
        cmd: cmd.to_owned(),
    })
}

#[must_use]
pub fn find_by_command(processes: &[RemoteProcess], needle: &str) -> Option<u32> {
    processes
        .iter()
        .find(|process| process.cmd.contains(needle))
        .map(|process| process.pid)
}

#[must_use]
pub fn contains_pid(processes: &[RemoteProcess], pid: u32) -> bool {
    processes.iter().any(|process| process.pid == pid)
}

/// `pid` and all of its descendants in termination order: every child comes
/// before its parent and `pid` itself is last.
#[must_use]
pub fn termination_order(processes: &[RemoteProcess], pid: u32) -> Vec<u32> {
    let mut ordered = Vec::new();
    let mut visiting = vec![pid];
    collect_post_order(processes, pid, &mut ordered, &mut visiting);
    ordered
}

fn collect_post_order(
    processes: &[RemoteProcess],
    pid: u32,
    ordered: &mut Vec<u32>,
    visiting: &mut Vec<u32>,
) {
    for child in processes.iter().filter(|process| process.ppid == pid) {
        // ps can report a pid as its own ancestor while pids are being recycled.
        if visiting.contains(&child.pid) {
            continue;
        }
        visiting.push(child.pid);
        collect_post_order(processes, child.pid, ordered, visiting);
        visiting.pop();
    }
    ordered.push(pid);
}
