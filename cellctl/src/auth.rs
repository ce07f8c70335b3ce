//! Credential acquisition.
//!
//! Mutating the database or the filespace needs a token for a superuser
//! principal unless the run uses local trust on a server. Tickets come
//! from a keytab via `kinit`, the afs token via `aklog`. Both commands
//! are idempotent, so this runs once per invocation and is never cached.

use std::path::Path;

use anyhow::{Context, Result, bail};
use common::exec::Executor;
use common::facts::Facts;
use log::debug;

/// Convert old Kerberos 4 principal separators to the modern form:
/// `admin.afs` becomes `admin/afs` unless the name already carries a `/`.
pub fn normalize_principal(user: &str) -> String {
    if user.contains('.') && !user.contains('/') {
        user.replace('.', "/")
    } else {
        user.to_string()
    }
}

pub fn login(exec: &Executor, facts: &Facts, keytab: &Path, principal: &str) -> Result<()> {
    debug!("login(keytab='{}', principal='{principal}')", keytab.display());
    if !keytab.exists() {
        bail!("keytab {} not found", keytab.display());
    }
    let kinit = facts.lookup_command("kinit")?;
    exec.run_once(&[
        kinit.to_string_lossy().into_owned(),
        "-k".to_string(),
        "-t".to_string(),
        keytab.to_string_lossy().into_owned(),
        principal.to_string(),
    ])
    .context("kinit failed")?;
    let aklog = facts.lookup_command("aklog")?;
    exec.run_once(&[aklog.to_string_lossy().into_owned(), "-d".to_string()])
        .context("aklog failed")?;
    Ok(())
}
