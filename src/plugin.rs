//! Hook entry points tying configuration, job lookup and the helper together.
//!
//! Only `--tunnel` parse errors reach the caller as failures. Everything that
//! goes wrong while bringing a tunnel up is logged and the job carries on
//! without it.

use crate::config::PluginConfig;
use crate::errors::{HookError, OptionError};
use crate::job::{self, Scheduler};
use crate::launcher::{self, TunnelHelper};
use crate::node::NodePolicy;
use crate::tunnel_spec::{self, TunnelSpec};

/// What the scheduler exposes to a hook invocation.
pub trait HookContext {
    fn job_and_step(&self) -> Result<(u32, u32), HookError>;
    fn is_remote(&self) -> bool;
}

/// A tunnel that came up during local setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Established {
    pub node: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default)]
pub struct Plugin {
    config: PluginConfig,
    tunnel: Option<TunnelSpec>,
    policy: NodePolicy,
}

impl Plugin {
    pub fn init(config: PluginConfig) -> Self {
        Plugin {
            config,
            ..Plugin::default()
        }
    }

    pub fn with_policy(mut self, policy: NodePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn tunnel(&self) -> Option<&TunnelSpec> {
        self.tunnel.as_ref()
    }

    /// `--tunnel` option callback.
    pub fn process_tunnel_option(&mut self, value: Option<&str>) -> Result<(), OptionError> {
        match tunnel_spec::parse_tunnel_option(value) {
            Ok(spec) => {
                tracing::debug!("tunnel: {} port pair(s) requested", spec.len());
                self.tunnel = Some(spec);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Bad value for --tunnel: {}", value.unwrap_or(""));
                Err(e)
            }
        }
    }

    /// Submission-side setup. Never fails the job: returns the tunnels that
    /// came up, possibly none.
    pub fn local_user_init<C, S, H>(&self, ctx: &C, scheduler: &S, helper: &H) -> Vec<Established>
    where
        C: HookContext + ?Sized,
        S: Scheduler + ?Sized,
        H: TunnelHelper + ?Sized,
    {
        let Some(ports) = &self.tunnel else {
            tracing::debug!("tunnel: not requested");
            return Vec::new();
        };

        match self.connect_nodes(ctx, scheduler, helper, ports) {
            Ok(established) => established,
            Err(e) => {
                tracing::warn!("tunnel: continuing without tunnel: {}", e);
                Vec::new()
            }
        }
    }

    fn connect_nodes<C, S, H>(
        &self,
        ctx: &C,
        scheduler: &S,
        helper: &H,
        ports: &TunnelSpec,
    ) -> Result<Vec<Established>, HookError>
    where
        C: HookContext + ?Sized,
        S: Scheduler + ?Sized,
        H: TunnelHelper + ?Sized,
    {
        let (job_id, step_id) = ctx.job_and_step()?;
        let job = job::resolve(scheduler, job_id, step_id)?;
        let targets = self.policy.select(&job.allocated_nodes)?;

        let mut established = Vec::new();
        for node in targets {
            match launcher::launch(helper, node, job_id, step_id, ports, &self.config) {
                Ok(port) => established.push(Established {
                    node: node.to_string(),
                    port,
                }),
                Err(e) => tracing::warn!("tunnel: node {}: {}", node, e),
            }
        }
        Ok(established)
    }

    /// Job end. On the execution side asks the helper to drop the tunnel of
    /// this step; nothing to do on the submission side.
    pub fn exit<C, H>(&self, ctx: &C, helper: &H) -> Result<(), HookError>
    where
        C: HookContext + ?Sized,
        H: TunnelHelper + ?Sized,
    {
        if !ctx.is_remote() {
            return Ok(());
        }

        let (job_id, step_id) = ctx.job_and_step()?;
        if let Err(e) = helper.remove(job_id, step_id) {
            tracing::warn!("tunnel: teardown of {}.{} failed: {}", job_id, step_id, e);
        }
        Ok(())
    }
}
