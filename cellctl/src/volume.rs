//! Volume lifecycle orchestration.
//!
//! The two public operations are convergent: `ensure_present` drives a
//! volume to the requested created/mounted/replicated state and
//! `ensure_absent` tears it down, and both are safe to repeat. The
//! database provides the only real mutual exclusion, so benign races
//! ("already exists", "no such entry") are treated as arrival at the
//! desired state rather than errors.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use common::exec::{CommandRunner, Executor, RetryPolicy};
use common::facts::Facts;
use common::types::{AclEntry, DirAcl, VolumeEntry};
use libnamespace::acl::AclManager;
use libnamespace::fscli::FsCli;
use libnamespace::mount::{MountManager, ROOT_VOLUME};
use libnamespace::probe::PathProbe;
use libnamespace::resolver::NamespaceResolver;
use libplacement::plan_sites;
use libvldb::VosClient;
use log::{debug, info};
use serde::Serialize;

use crate::auth;

#[derive(Debug, Clone)]
pub struct VolumeRequest {
    pub volume: String,
    pub server: Option<String>,
    pub partition: Option<String>,
    pub mount: Option<PathBuf>,
    pub acl: Vec<AclEntry>,
    pub quota: u64,
    pub replicas: usize,
    pub localauth: bool,
    pub auth_user: String,
    pub auth_keytab: PathBuf,
}

impl Default for VolumeRequest {
    fn default() -> VolumeRequest {
        VolumeRequest {
            volume: String::new(),
            server: None,
            partition: None,
            mount: None,
            acl: Vec::new(),
            quota: 0,
            replicas: 0,
            localauth: false,
            auth_user: "admin".to_string(),
            auth_keytab: PathBuf::from("admin.keytab"),
        }
    }
}

/// What a run did, for the caller to display or persist.
#[derive(Debug, Default, Serialize)]
pub struct VolumeOutcome {
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<DirAcl>,
}

pub struct Orchestrator {
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn PathProbe>,
    facts: Facts,
    policy: RetryPolicy,
}

struct Toolset {
    vos: VosClient,
    fs: FsCli,
    ns: NamespaceResolver,
}

impl Orchestrator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn PathProbe>,
        facts: Facts,
    ) -> Orchestrator {
        Orchestrator::with_policy(runner, probe, facts, RetryPolicy::default())
    }

    pub fn with_policy(
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn PathProbe>,
        facts: Facts,
        policy: RetryPolicy,
    ) -> Orchestrator {
        Orchestrator {
            runner,
            probe,
            facts,
            policy,
        }
    }

    fn toolset(&self, req: &VolumeRequest) -> Result<Toolset> {
        let vos_path = self.facts.lookup_command("vos")?;
        let fs_path = self.facts.lookup_command("fs")?;
        let vos = VosClient::with_policy(self.runner.clone(), vos_path, req.localauth, self.policy);
        let fs = FsCli::new(self.runner.clone(), fs_path);
        let ns = NamespaceResolver::new(fs.clone(), self.facts.clone(), self.probe.clone());
        Ok(Toolset { vos, fs, ns })
    }

    fn validate(&self, req: &VolumeRequest) -> Result<()> {
        if req.volume.is_empty() {
            bail!("volume name is required");
        }
        if let Some(mount) = &req.mount {
            if !mount.is_absolute() {
                bail!("mount must be an absolute path: {}", mount.display());
            }
        }
        Ok(())
    }

    fn login(&self, req: &VolumeRequest) -> Result<()> {
        let exec = Executor::new(self.runner.clone());
        let principal = auth::normalize_principal(&req.auth_user);
        auth::login(&exec, &self.facts, &req.auth_keytab, &principal)
    }

    /// Converge on the requested volume state: create, mount, set the
    /// ACL, add replica sites and release.
    pub fn ensure_present(&self, req: &VolumeRequest) -> Result<VolumeOutcome> {
        info!("ensure_present(volume='{}')", req.volume);
        self.validate(req)?;
        let tools = self.toolset(req)?;
        let mut outcome = VolumeOutcome::default();

        if !req.localauth {
            self.login(req)?;
        }

        // Default the location to the first discovered server/partition.
        let server = match &req.server {
            Some(server) => server.clone(),
            None => {
                let servers = tools.vos.list_addrs()?;
                servers
                    .iter()
                    .flat_map(|s| s.addrs.first())
                    .next()
                    .context("no fileservers found")?
                    .clone()
            }
        };
        let partition = match &req.partition {
            Some(partition) => partition.clone(),
            None => {
                let partitions = tools.vos.list_partitions(&server)?;
                partitions
                    .into_iter()
                    .next()
                    .with_context(|| format!("no partitions found on server {server}"))?
            }
        };
        debug!("placing volume '{}' on {server}/{partition}", req.volume);

        if tools.vos.create(&req.volume, &server, &partition, req.quota)? {
            outcome.changed = true;
        }

        if let Some(mount) = &req.mount {
            let mm = MountManager::new(&tools.fs, &tools.vos, &tools.ns);
            let mounted = mm.mount(&req.volume, mount, None, false)?;
            outcome.changed |= mounted.changed;
            outcome.mount = mounted.mount;

            if !req.acl.is_empty() {
                let am = AclManager::new(&tools.fs, &tools.ns);
                let acled = am.set_acl(&req.volume, mount, &req.acl)?;
                outcome.changed |= acled.changed;
                outcome.acl = acled.acl;
            }
        }

        if req.replicas > 0 {
            let servers = tools.vos.list_addrs()?;
            let entry = tools.vos.get_entry(&req.volume, true)?;
            let additions = plan_sites(&servers, &entry.sites, req.replicas, &tools.vos)?;
            for site in &additions {
                if tools.vos.add_site(&req.volume, &site.server, &site.partition)? {
                    outcome.changed = true;
                }
            }
        }

        let mut entry = tools.vos.get_entry(&req.volume, true)?;
        // root.afs release is deferred until root.cell is mounted;
        // releasing it early can orphan the synthetic mount path.
        if req.volume != ROOT_VOLUME && entry.needs_release() {
            if tools.vos.release(&req.volume)? {
                outcome.changed = true;
            }
            tools.fs.check_volumes()?;
            entry = tools.vos.get_entry(&req.volume, true)?;
        }
        outcome.volume = Some(entry);
        Ok(outcome)
    }

    /// Remove the volume, its mount points and every replica site. The
    /// database does not cascade-delete read-only sites, so each one is
    /// removed by location before the read-write entry goes.
    pub fn ensure_absent(&self, req: &VolumeRequest) -> Result<VolumeOutcome> {
        info!("ensure_absent(volume='{}')", req.volume);
        self.validate(req)?;
        let tools = self.toolset(req)?;
        let mut outcome = VolumeOutcome::default();

        if !req.localauth {
            self.login(req)?;
        }

        if let Some(mount) = &req.mount {
            let mm = MountManager::new(&tools.fs, &tools.vos, &tools.ns);
            let unmounted = mm.unmount(&req.volume, mount)?;
            outcome.changed |= unmounted.changed;
        }

        let entry = tools.vos.get_entry(&req.volume, false)?;
        if let Some(ro) = entry.ro {
            let ro = ro.to_string();
            for site in entry.ro_sites() {
                if tools
                    .vos
                    .remove(&ro, Some(&site.server), Some(&site.partition))?
                {
                    outcome.changed = true;
                }
            }
        }
        if tools.vos.remove(&req.volume, None, None)? {
            outcome.changed = true;
        }
        Ok(outcome)
    }
}
