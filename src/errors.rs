use std::io;

use crate::hostlist::HostlistError;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum OptionError {
    #[error("invalid --tunnel value '{0}': expected SUBMIT:EXEC[,SUBMIT:EXEC...] with ports in 1-65535")]
    InvalidFormat(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("job {0} not found or ambiguous")]
    NotFound(u32),

    #[error("job {0} has no allocated nodes")]
    NoAllocation(u32),

    #[error("job {job_id} has an unparseable node list")]
    InvalidNodeList {
        job_id: u32,
        #[source]
        source: HostlistError,
    },

    #[error("unable to query the scheduler: {0}")]
    QueryFailed(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SelectError {
    #[error("allocation is empty")]
    EmptyAllocation,
}

#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    #[error("failed to start tunnel helper")]
    SpawnFailed(#[from] io::Error),

    #[error("tunnel helper did not report a forwarding port")]
    NoPortReported,
}

#[derive(thiserror::Error, Debug)]
pub enum HookError {
    #[error("unable to get {0} from the hook context")]
    MissingItem(&'static str),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}
