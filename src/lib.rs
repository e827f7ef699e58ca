pub mod config;
pub mod errors;
pub mod hostlist;
pub mod job;
pub mod launcher;
pub mod logging;
pub mod node;
pub mod plugin;
pub mod tunnel_spec;

pub use config::PluginConfig;
pub use errors::{HookError, LaunchError, OptionError, ResolveError, SelectError};
pub use job::{JobContext, JobRecord, Scheduler, ScontrolScheduler};
pub use launcher::{HelperLauncher, HelperSettings, TunnelHelper, TunnelProcess, TunnelState};
pub use node::{NodePolicy, select_target};
pub use plugin::{Established, HookContext, Plugin};
pub use tunnel_spec::{PortPair, TunnelSpec, parse_tunnel_option};
