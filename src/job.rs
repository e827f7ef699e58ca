use std::collections::HashMap;
use std::process::Command;

use crate::errors::ResolveError;
use crate::hostlist;

pub const DEFAULT_SCONTROL: &str = "scontrol";

/// One job record as reported by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: u32,
    /// Compact node list, `None` when the job has no allocation yet.
    pub node_list: Option<String>,
    pub user_id: u32,
}

/// Job lookups against the scheduler.
pub trait Scheduler {
    /// All records matching `job_id`. Zero records means the job is unknown.
    fn job_records(&self, job_id: u32) -> Result<Vec<JobRecord>, ResolveError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: u32,
    pub step_id: u32,
    pub allocated_nodes: Vec<String>,
    pub user_id: u32,
}

/// Look up the job and expand its allocation into hostnames.
pub fn resolve<S: Scheduler + ?Sized>(
    scheduler: &S,
    job_id: u32,
    step_id: u32,
) -> Result<JobContext, ResolveError> {
    let mut records = scheduler.job_records(job_id)?;
    if records.len() != 1 {
        tracing::error!(
            "job {} lookup returned {} records, expected exactly one",
            job_id,
            records.len()
        );
        return Err(ResolveError::NotFound(job_id));
    }
    let record = records.remove(0);

    let compact = record
        .node_list
        .as_deref()
        .map(str::trim)
        .filter(|nodes| !nodes.is_empty())
        .ok_or(ResolveError::NoAllocation(job_id))?;

    let allocated_nodes = hostlist::expand(compact)
        .map_err(|source| ResolveError::InvalidNodeList { job_id, source })?;
    if allocated_nodes.is_empty() {
        return Err(ResolveError::NoAllocation(job_id));
    }

    tracing::debug!("job {} allocated on {}", job_id, allocated_nodes.join(","));
    Ok(JobContext {
        job_id,
        step_id,
        allocated_nodes,
        user_id: record.user_id,
    })
}

/// Reads job records through `scontrol show job -o`.
#[derive(Debug, Clone)]
pub struct ScontrolScheduler {
    program: String,
}

impl Default for ScontrolScheduler {
    fn default() -> Self {
        ScontrolScheduler {
            program: DEFAULT_SCONTROL.to_string(),
        }
    }
}

impl ScontrolScheduler {
    pub fn new(program: impl Into<String>) -> Self {
        ScontrolScheduler {
            program: program.into(),
        }
    }
}

impl Scheduler for ScontrolScheduler {
    fn job_records(&self, job_id: u32) -> Result<Vec<JobRecord>, ResolveError> {
        let output = Command::new(&self.program)
            .arg("show")
            .arg("job")
            .arg("-o")
            .arg(job_id.to_string())
            .output()
            .map_err(|e| ResolveError::QueryFailed(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_ascii_lowercase().contains("invalid job id") {
                return Ok(Vec::new());
            }
            return Err(ResolveError::QueryFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        parse_job_records(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `scontrol show job -o` output: one record per non-empty line of
/// whitespace-separated `Key=Value` tokens.
pub fn parse_job_records(output: &str) -> Result<Vec<JobRecord>, ResolveError> {
    let mut records = Vec::new();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let fields: HashMap<&str, &str> = line
            .split_whitespace()
            .filter_map(|tok| tok.split_once('='))
            .collect();

        let job_id = fields
            .get("JobId")
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| ResolveError::QueryFailed(format!("record without JobId: {line}")))?;

        let node_list = fields
            .get("NodeList")
            .filter(|v| !v.is_empty() && **v != "(null)")
            .map(|v| v.to_string());

        let user_id = fields
            .get("UserId")
            .and_then(|v| parse_user_id(v))
            .ok_or_else(|| {
                ResolveError::QueryFailed(format!("record for job {job_id} without UserId"))
            })?;

        records.push(JobRecord {
            job_id,
            node_list,
            user_id,
        });
    }

    Ok(records)
}

/// `UserId` is printed as `name(uid)`, or a bare uid when the name is unknown.
fn parse_user_id(value: &str) -> Option<u32> {
    match value.rsplit_once('(') {
        Some((_, rest)) => rest.strip_suffix(')')?.parse().ok(),
        None => value.parse().ok(),
    }
}
