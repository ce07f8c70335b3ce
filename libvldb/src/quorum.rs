//! Database election probe.
//!
//! `udebug` reports the ubik election state of a database server. A
//! database has quorum when the local host is the sync site with recovery
//! complete, or when a remote sync site has been elected. The wait loop
//! polls both the protection and volume location databases until both
//! report quorum or the deadline passes.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::exec::CommandRunner;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;

use crate::error::VldbError;

pub const PR_PORT: u16 = 7002;
pub const VL_PORT: u16 = 7003;

lazy_static! {
    static ref SYNC_SITE: Regex = Regex::new(r"^I am sync site").unwrap();
    static ref RECOVERY_STATE: Regex = Regex::new(r"^Recovery state ([0-9a-f]+)").unwrap();
    static ref SYNC_HOST: Regex = Regex::new(r"^Sync host (\S+) was set \d+ secs ago").unwrap();
    static ref DB_VERSION: Regex =
        Regex::new(r"^Sync site's db version is (\d+)\.(\d+)").unwrap();
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuorumStatus {
    pub port: u16,
    pub quorum: bool,
    pub sync_site: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_version: Option<(u64, u64)>,
}

pub fn parse_udebug(port: u16, out: &str) -> QuorumStatus {
    let mut status = QuorumStatus {
        port,
        ..Default::default()
    };
    for line in out.lines() {
        if SYNC_SITE.is_match(line) {
            status.sync_site = true;
            info!("local host is sync site for port {port}");
            continue;
        }
        if let Some(c) = RECOVERY_STATE.captures(line) {
            status.recovery_state = Some(c[1].to_string());
            continue;
        }
        if let Some(c) = SYNC_HOST.captures(line) {
            if &c[1] != "0.0.0.0" {
                status.sync_host = Some(c[1].to_string());
                info!("remote host is sync site: {}", &c[1]);
            }
            continue;
        }
        if let Some(c) = DB_VERSION.captures(line) {
            status.db_version = match (c[1].parse(), c[2].parse()) {
                (Ok(epoch), Ok(counter)) => Some((epoch, counter)),
                _ => None,
            };
        }
    }
    // The sync site must also have finished recovery; a remote sync site
    // address is enough on its own.
    if status.sync_site {
        if matches!(status.recovery_state.as_deref(), Some("1f") | Some("f")) {
            status.quorum = true;
        }
    } else if status.sync_host.is_some() {
        status.quorum = true;
    }
    status
}

#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub delay: Duration,
    pub sleep: Duration,
    pub fail_on_timeout: bool,
}

impl Default for WaitOptions {
    fn default() -> WaitOptions {
        WaitOptions {
            timeout: Duration::from_secs(600),
            delay: Duration::ZERO,
            sleep: Duration::from_secs(20),
            fail_on_timeout: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuorumReport {
    pub pr: QuorumStatus,
    pub vl: QuorumStatus,
    pub retries: u32,
}

impl QuorumReport {
    pub fn quorum(&self) -> bool {
        self.pr.quorum && self.vl.quorum
    }
}

pub struct QuorumProbe {
    runner: Arc<dyn CommandRunner>,
    udebug: PathBuf,
}

impl QuorumProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, udebug: PathBuf) -> QuorumProbe {
        QuorumProbe { runner, udebug }
    }

    /// One udebug probe against the local server. A failed probe is not an
    /// error, just not quorum yet.
    pub fn check(&self, port: u16) -> Result<QuorumStatus, VldbError> {
        let argv = vec![
            self.udebug.to_string_lossy().into_owned(),
            "-server".to_string(),
            "localhost".to_string(),
            "-port".to_string(),
            port.to_string(),
        ];
        debug!("running: {}", argv.join(" "));
        let out = self.runner.run(&argv)?;
        if out.status != 0 {
            warn!(
                "failed udebug: rc={}, out={}, err={}",
                out.status, out.stdout, out.stderr
            );
            return Ok(QuorumStatus {
                port,
                ..Default::default()
            });
        }
        Ok(parse_udebug(port, &out.stdout))
    }

    /// Wait for both database services to elect a sync site.
    pub fn wait_for_quorum(&self, opts: WaitOptions) -> Result<QuorumReport, VldbError> {
        let sleep = opts.sleep.max(Duration::from_secs(1));
        if !opts.delay.is_zero() {
            thread::sleep(opts.delay);
        }
        let deadline = Instant::now() + opts.timeout;
        let mut retries = 0u32;
        loop {
            let pr = self.check(PR_PORT)?;
            let vl = self.check(VL_PORT)?;
            let report = QuorumReport { pr, vl, retries };
            if report.quorum() {
                info!("databases have quorum");
                return Ok(report);
            }
            if Instant::now() > deadline {
                if opts.fail_on_timeout {
                    return Err(VldbError::QuorumTimeout(opts.timeout));
                }
                warn!("timeout expired waiting for quorum");
                return Ok(report);
            }
            info!("will retry in {} seconds", sleep.as_secs());
            thread::sleep(sleep);
            retries += 1;
        }
    }
}
