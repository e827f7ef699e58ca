use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::Colorize;

use stunnel::launcher::{DEFAULT_HELPER, HelperLauncher, HelperSettings};
use stunnel::{HookContext, HookError, NodePolicy, Plugin, PluginConfig, ScontrolScheduler};

#[derive(Parser)]
#[command(name = "stunnel")]
#[command(about = "Forward ports from a job's execution node to the submission host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Plugin argument (key=value, '|' stands for a space)
    ///
    /// Examples:
    ///   -a ssh_cmd=/usr/bin/ssh
    ///   -a ssh_args=-o|ServerAliveInterval=30
    #[arg(short = 'a', long = "plugin-arg", global = true)]
    plugin_args: Vec<String>,

    /// JSON config file (defaults to <config dir>/stunnel/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Tunnel helper program
    #[arg(long, global = true, env = "STUNNEL_HELPER", default_value = DEFAULT_HELPER)]
    helper: PathBuf,

    /// Seconds to wait for the helper to report its port
    #[arg(long, global = true, default_value_t = 10)]
    read_timeout: u64,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a --tunnel value (option parsing stage)
    CheckOption {
        /// SUBMIT:EXEC[,SUBMIT:EXEC...]
        value: Option<String>,
    },
    /// Bring up the tunnel once the job is allocated (submission side)
    ///
    /// Examples:
    ///   stunnel local-setup --tunnel 8888:8888
    ///   stunnel local-setup --tunnel 8080:80,6006:6006 --nodes all
    LocalSetup {
        /// SUBMIT:EXEC[,SUBMIT:EXEC...]
        #[arg(long, env = "SLURM_STUNNEL")]
        tunnel: Option<String>,
        /// Which allocated nodes to connect: first, last or all
        #[arg(long, default_value = "first")]
        nodes: NodePolicy,
        /// scontrol program used to look up the job
        #[arg(long, default_value = stunnel::job::DEFAULT_SCONTROL)]
        scontrol: String,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Tear the tunnel down at job end (execution side)
    Exit {
        /// Treat this invocation as running on the execution node
        #[arg(long)]
        remote: bool,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Print the effective plugin configuration
    ShowConfig,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Clone, Copy)]
struct JobArgs {
    #[arg(long, env = "SLURM_JOB_ID")]
    job_id: Option<u32>,
    #[arg(long, env = "SLURM_STEP_ID")]
    step_id: Option<u32>,
}

/// Hook context assembled from flags and the job environment.
struct CliContext {
    job: JobArgs,
    remote: bool,
}

impl HookContext for CliContext {
    fn job_and_step(&self) -> Result<(u32, u32), HookError> {
        let job_id = self.job.job_id.ok_or(HookError::MissingItem("job id"))?;
        let step_id = self.job.step_id.ok_or(HookError::MissingItem("job step id"))?;
        Ok((job_id, step_id))
    }

    fn is_remote(&self) -> bool {
        self.remote
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    stunnel::logging::init(cli.verbose);

    match &cli.command {
        Commands::Completions { shell } => {
            generate_completions(*shell);
        }
        _ => {
            // Configuration is fixed from here on
            let config = PluginConfig::from_file(cli.config.as_deref())?
                .with_tokens(&cli.plugin_args);
            let plugin = Plugin::init(config);
            let launcher = HelperLauncher::new(HelperSettings {
                program: cli.helper.clone(),
                read_timeout: Duration::from_secs(cli.read_timeout),
            });

            match &cli.command {
                Commands::CheckOption { value } => {
                    check_option(plugin, value.as_deref())?;
                }
                Commands::LocalSetup {
                    tunnel,
                    nodes,
                    scontrol,
                    job,
                } => {
                    let plugin = plugin.with_policy(*nodes);
                    local_setup(plugin, tunnel.as_deref(), scontrol, *job, &launcher)?;
                }
                Commands::Exit { remote, job } => {
                    let ctx = CliContext {
                        job: *job,
                        remote: *remote || env::var_os("SLURMD_NODENAME").is_some(),
                    };
                    plugin
                        .exit(&ctx, &launcher)
                        .context("Failed to tear down tunnel")?;
                }
                Commands::ShowConfig => {
                    let contents = serde_json::to_string_pretty(plugin.config())
                        .context("Failed to serialize config")?;
                    println!("{}", contents);
                }
                Commands::Completions { .. } => unreachable!(),
            }
        }
    }

    Ok(())
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "stunnel", &mut io::stdout());
}

fn check_option(mut plugin: Plugin, value: Option<&str>) -> Result<()> {
    if let Err(e) = plugin.process_tunnel_option(value) {
        eprintln!("{}", format!("✗ {}", e).red());
        anyhow::bail!("tunnel option rejected");
    }

    if let Some(spec) = plugin.tunnel() {
        println!("{}", "✓ Tunnel option accepted".green().bold());
        for pair in spec.pairs() {
            println!("  {} {}", "submit → exec:".dimmed(), pair.to_string().cyan());
        }
    }
    Ok(())
}

fn local_setup(
    mut plugin: Plugin,
    tunnel: Option<&str>,
    scontrol: &str,
    job: JobArgs,
    launcher: &HelperLauncher,
) -> Result<()> {
    if tunnel.is_some() {
        plugin
            .process_tunnel_option(tunnel)
            .context("Invalid --tunnel value")?;
    }

    let ctx = CliContext { job, remote: false };
    let scheduler = ScontrolScheduler::new(scontrol);
    let established = plugin.local_user_init(&ctx, &scheduler, launcher);

    if plugin.tunnel().is_none() {
        return Ok(());
    }

    if established.is_empty() {
        println!("{}", "⚠ No tunnel established, job continues without it".yellow());
        return Ok(());
    }

    for tunnel in &established {
        println!("{}", "✓ Tunnel established".green().bold());
        println!("  {}: {}", "Node".cyan(), tunnel.node);
        println!("  {}: {}", "Forward".cyan(), tunnel.port);
    }
    Ok(())
}
