use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::exec::SystemRunner;
use common::facts::Facts;
use common::types::AclEntry;
use libnamespace::probe::DiskProbe;
use libvldb::quorum::{QuorumProbe, WaitOptions};

use cellctl::volume::{Orchestrator, VolumeRequest};

#[derive(Parser)]
#[command(name = "cellctl")]
#[command(about = "Provision OpenAFS volumes, mount points and ACLs", long_about = None)]
struct Cli {
    /// Path to the facts cache recorded at install time.
    #[arg(long, global = true, value_name = "PATH")]
    facts: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct AuthArgs {
    /// Authenticate with the server key instead of a keytab (server only).
    #[arg(long)]
    localauth: bool,

    /// Superuser principal to authenticate as.
    #[arg(long, default_value = "admin")]
    auth_user: String,

    /// Keytab holding the superuser credentials.
    #[arg(long, default_value = "admin.keytab", value_name = "PATH")]
    auth_keytab: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Ensure a volume is present, mounted and replicated")]
    Create {
        #[arg(value_name = "VOLUME")]
        volume: String,

        /// Fileserver for the read-write site; defaults to the first
        /// server registered in the VLDB.
        #[arg(long)]
        server: Option<String>,

        /// Partition id for the read-write site; defaults to the first
        /// partition on the server.
        #[arg(long)]
        partition: Option<String>,

        /// Mount point path; the volume is created but not mounted when
        /// omitted.
        #[arg(long, value_name = "PATH")]
        mount: Option<PathBuf>,

        /// ACL term for the volume root directory, as "principal rights";
        /// repeatable.
        #[arg(long = "acl", value_name = "TERM")]
        acl: Vec<String>,

        /// Volume quota in kilobyte blocks; 0 means unlimited.
        #[arg(long, default_value_t = 0)]
        quota: u64,

        /// Minimum number of read-only sites, counting the clone.
        #[arg(long, default_value_t = 0)]
        replicas: usize,

        #[command(flatten)]
        auth: AuthArgs,
    },
    #[command(about = "Ensure a volume and its mount points are absent")]
    Remove {
        #[arg(value_name = "VOLUME")]
        volume: String,

        /// Mount point path to remove before deleting the volume.
        #[arg(long, value_name = "PATH")]
        mount: Option<PathBuf>,

        #[command(flatten)]
        auth: AuthArgs,
    },
    #[command(about = "Wait for the database servers to elect a sync site")]
    WaitQuorum {
        /// Give up after this many seconds.
        #[arg(long, default_value_t = 600)]
        timeout: u64,

        /// Seconds to wait before the first probe.
        #[arg(long, default_value_t = 0)]
        delay: u64,

        /// Seconds between probes.
        #[arg(long, default_value_t = 20)]
        sleep: u64,

        /// Treat a timeout as an error instead of reporting no quorum.
        #[arg(long)]
        fail_on_timeout: bool,
    },
}

fn parse_acl(terms: &[String]) -> Result<Vec<AclEntry>> {
    terms
        .iter()
        .map(|term| Ok(term.parse::<AclEntry>()?))
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let facts = match &cli.facts {
        Some(path) => Facts::load_from(path),
        None => Facts::load(),
    };
    let runner = Arc::new(SystemRunner);

    match cli.command {
        Commands::Create {
            volume,
            server,
            partition,
            mount,
            acl,
            quota,
            replicas,
            auth,
        } => {
            let orchestrator = Orchestrator::new(runner, Arc::new(DiskProbe), facts);
            let req = VolumeRequest {
                volume,
                server,
                partition,
                mount,
                acl: parse_acl(&acl)?,
                quota,
                replicas,
                localauth: auth.localauth,
                auth_user: auth.auth_user,
                auth_keytab: auth.auth_keytab,
            };
            let outcome = orchestrator.ensure_present(&req)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Remove {
            volume,
            mount,
            auth,
        } => {
            let orchestrator = Orchestrator::new(runner, Arc::new(DiskProbe), facts);
            let req = VolumeRequest {
                volume,
                mount,
                localauth: auth.localauth,
                auth_user: auth.auth_user,
                auth_keytab: auth.auth_keytab,
                ..Default::default()
            };
            let outcome = orchestrator.ensure_absent(&req)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::WaitQuorum {
            timeout,
            delay,
            sleep,
            fail_on_timeout,
        } => {
            let udebug = facts.lookup_command("udebug")?;
            let probe = QuorumProbe::new(runner, udebug);
            let report = probe.wait_for_quorum(WaitOptions {
                timeout: Duration::from_secs(timeout),
                delay: Duration::from_secs(delay),
                sleep: Duration::from_secs(sleep),
                fail_on_timeout,
            })?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
