//! Typed operations over the volume location database.
//!
//! Every operation wraps the retrying executor with its own verdict
//! classifier. The database may be mid-election when we are called, so
//! transient failures retry, and outcomes that mean "already in the
//! desired state" count as success so each operation is safe to call
//! unconditionally.

use std::path::PathBuf;
use std::sync::Arc;

use common::exec::{CommandRunner, Executor, RetryPolicy, Verdict, is_transient};
use common::types::{FileServer, VolumeEntry};
use log::{debug, info, warn};

use crate::decode;
use crate::error::VldbError;

#[derive(Clone)]
pub struct VosClient {
    exec: Executor,
    vos: PathBuf,
    localauth: bool,
}

impl VosClient {
    pub fn new(runner: Arc<dyn CommandRunner>, vos: PathBuf, localauth: bool) -> VosClient {
        VosClient::with_policy(runner, vos, localauth, RetryPolicy::default())
    }

    pub fn with_policy(
        runner: Arc<dyn CommandRunner>,
        vos: PathBuf,
        localauth: bool,
        policy: RetryPolicy,
    ) -> VosClient {
        VosClient {
            exec: Executor::with_policy(runner, policy),
            vos,
            localauth,
        }
    }

    fn argv(&self, args: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        argv.push(self.vos.to_string_lossy().into_owned());
        argv.extend(args.iter().map(|s| s.to_string()));
        if self.localauth {
            argv.push("-localauth".to_string());
        }
        argv
    }

    /// List the fileservers registered in the VLDB. An empty result is
    /// itself transient: the servers may simply not have registered yet.
    pub fn list_addrs(&self) -> Result<Vec<FileServer>, VldbError> {
        debug!("list_addrs()");
        let out = self.exec.run_with_retry(
            &self.argv(&["listaddrs", "-noresolve", "-printuuid"]),
            |out| {
                if out.status == 0 && !out.stdout.is_empty() {
                    Verdict::Done
                } else if out.stdout.is_empty() || is_transient(&out.stderr) {
                    Verdict::Retry
                } else {
                    Verdict::Fatal
                }
            },
        )?;
        Ok(decode::parse_listaddrs(&out.stdout))
    }

    /// List the partitions available on a fileserver, in response order.
    pub fn list_partitions(&self, server: &str) -> Result<Vec<String>, VldbError> {
        debug!("list_partitions(server='{server}')");
        let out = self
            .exec
            .run_with_retry(&self.argv(&["listpart", "-server", server]), |out| {
                if out.status == 0 && out.stdout.contains(decode::PARTITION_HEADER) {
                    Verdict::Done
                } else if is_transient(&out.stderr)
                    || out.stderr.contains("Possible communication failure")
                    || out.stderr.contains("Could not fetch the list of partitions")
                {
                    Verdict::Retry
                } else {
                    Verdict::Fatal
                }
            })?;
        let parts = decode::parse_partitions(&out.stdout);
        debug!("partitions={parts:?}");
        Ok(parts)
    }

    /// Look up a volume's VLDB entry. With `retry_not_found` the caller
    /// expects the entry to appear eventually and "no such entry" retries;
    /// without it, absence is an acceptable answer and yields an entry
    /// with no id and no sites.
    pub fn get_entry(&self, name: &str, retry_not_found: bool) -> Result<VolumeEntry, VldbError> {
        debug!("get_entry(name='{name}', retry_not_found={retry_not_found})");
        let out = self.exec.run_with_retry(
            &self.argv(&["listvldb", "-name", name, "-noresolve", "-nosort"]),
            |out| {
                if out.status == 0 {
                    return Verdict::Done;
                }
                if out.stderr.contains("no such entry") {
                    if retry_not_found {
                        warn!("volume {name} not found");
                        return Verdict::Retry;
                    }
                    return Verdict::Done;
                }
                if is_transient(&out.stderr) {
                    Verdict::Retry
                } else {
                    Verdict::Fatal
                }
            },
        )?;
        let mut entry = decode::parse_listvldb(&out.stdout);
        if entry.name.is_empty() {
            entry.name = name.to_string();
        }
        Ok(entry)
    }

    /// Create a volume. Safe to call unconditionally: "already exists" is
    /// success. Returns true when the volume was actually created.
    pub fn create(
        &self,
        name: &str,
        server: &str,
        partition: &str,
        quota: u64,
    ) -> Result<bool, VldbError> {
        debug!("create(name='{name}', server='{server}', partition='{partition}', quota={quota})");
        let quota = quota.to_string();
        let out = self.exec.run_with_retry(
            &self.argv(&[
                "create",
                "-server",
                server,
                "-partition",
                partition,
                "-name",
                name,
                "-maxquota",
                &quota,
            ]),
            |out| {
                if out.status == 0 {
                    return Verdict::Done;
                }
                if out.stderr.contains("already exists") {
                    info!("volume '{name}' already exists");
                    return Verdict::Done;
                }
                if is_transient(&out.stderr)
                    || out.stderr.contains("Possible communication failure")
                    || out.stderr.contains("Could not fetch the list of partitions")
                {
                    Verdict::Retry
                } else {
                    Verdict::Fatal
                }
            },
        )?;
        Ok(out.status == 0)
    }

    /// Add a read-only site. "RO already exists on partition" is success.
    pub fn add_site(&self, name: &str, server: &str, partition: &str) -> Result<bool, VldbError> {
        debug!("add_site(name='{name}', server='{server}', partition='{partition}')");
        let out = self.exec.run_with_retry(
            &self.argv(&["addsite", "-server", server, "-partition", partition, "-id", name]),
            |out| {
                if out.status == 0 || out.stderr.contains("RO already exists on partition") {
                    Verdict::Done
                } else if is_transient(&out.stderr) {
                    Verdict::Retry
                } else {
                    Verdict::Fatal
                }
            },
        )?;
        Ok(out.status == 0)
    }

    /// Release a volume to its read-only sites. A volume with no replicas
    /// has nothing to release and that is fine.
    pub fn release(&self, name: &str) -> Result<bool, VldbError> {
        debug!("release(name='{name}')");
        let out = self
            .exec
            .run_with_retry(&self.argv(&["release", "-id", name, "-verbose"]), |out| {
                if out.status == 0
                    || out
                        .stderr
                        .contains("has no replicas - release operation is meaningless")
                {
                    Verdict::Done
                } else if is_transient(&out.stderr) {
                    Verdict::Retry
                } else {
                    Verdict::Fatal
                }
            })?;
        Ok(out.status == 0)
    }

    /// Remove a volume, or one site of it when a server (and optionally a
    /// partition) is given. An entry that is already gone is success.
    pub fn remove(
        &self,
        name: &str,
        server: Option<&str>,
        partition: Option<&str>,
    ) -> Result<bool, VldbError> {
        debug!("remove(name='{name}', server={server:?}, partition={partition:?})");
        let mut args = vec!["remove", "-id", name];
        if let Some(server) = server {
            args.extend(["-server", server]);
        }
        if let Some(partition) = partition {
            args.extend(["-partition", partition]);
        }
        let out = self.exec.run_with_retry(&self.argv(&args), |out| {
            if out.status == 0 && out.stderr.is_empty() {
                return Verdict::Done;
            }
            if out.stderr.contains("no such entry")
                || (out.status == 0 && out.stderr.contains("Can't find volume name"))
            {
                warn!("volume {name} not found");
                return Verdict::Done;
            }
            if is_transient(&out.stderr) {
                Verdict::Retry
            } else {
                Verdict::Fatal
            }
        })?;
        Ok(out.status == 0 && out.stderr.is_empty())
    }
}
