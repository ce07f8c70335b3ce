//! Directory ACL management.
//!
//! The access list is replaced wholesale (`fs setacl -clear`) and read
//! back; comparing the full before and after maps is the only change
//! signal. The same path special cases apply as for mount points.

use std::path::Path;

use common::types::{AclEntry, DirAcl};
use log::{info, warn};

use crate::error::NamespaceError;
use crate::fscli::FsCli;
use crate::mount::ROOT_VOLUME;
use crate::resolver::NamespaceResolver;

#[derive(Debug, Clone, Default)]
pub struct AclOutcome {
    pub changed: bool,
    pub acl: Option<DirAcl>,
}

pub struct AclManager<'a> {
    fs: &'a FsCli,
    ns: &'a NamespaceResolver,
}

impl<'a> AclManager<'a> {
    pub fn new(fs: &'a FsCli, ns: &'a NamespaceResolver) -> AclManager<'a> {
        AclManager { fs, ns }
    }

    /// Set the access list on the root directory of a volume. Assumes the
    /// acting principal is a member of the administrators group.
    pub fn set_acl(
        &self,
        volume: &str,
        path: &Path,
        entries: &[AclEntry],
    ) -> Result<AclOutcome, NamespaceError> {
        info!(
            "set_acl(volume='{volume}', path='{}', entries={entries:?})",
            path.display()
        );
        let afsroot = self.ns.afs_root()?.to_path_buf();
        let cell = self.ns.cell_name()?.to_string();
        let dynroot = self.ns.dynroot()?;

        let mut path = path.to_path_buf();
        if volume == ROOT_VOLUME && path == afsroot {
            if dynroot {
                path = self.ns.synthetic_mount(&cell, ROOT_VOLUME)?;
                info!(
                    "setting '{volume}' acl with dynroot path '{}'",
                    path.display()
                );
            } else if self.fs.is_read_only(&path)? {
                // Once root.afs has been released, the plain path reaches
                // the read-only volume and can no longer take ACLs.
                info!(
                    "skipping acl change of root.afs on path '{}'",
                    path.display()
                );
                return Ok(AclOutcome::default());
            }
        }

        // Prefer the read-write tree for the full path.
        if let Some(candidate) = self.ns.readwrite_candidate(&path)? {
            if self.ns.probe().exists(&candidate) {
                info!("setting acl with rw path '{}'", candidate.display());
                path = candidate;
            } else {
                warn!("path_rw='{}' does not exist", candidate.display());
            }
        }

        let terms: Vec<(String, String)> = entries
            .iter()
            .map(|e| (e.principal.clone(), e.rights.clone()))
            .collect();
        info!("setting acl on path '{}'", path.display());
        let before = self.fs.listacl(&path)?;
        self.fs.setacl(&path, &terms, true)?;
        let after = self.fs.listacl(&path)?;
        let changed = after != before;
        if changed {
            info!("changed: acl from={before:?} to={after:?}");
        }
        Ok(AclOutcome {
            changed,
            acl: Some(after),
        })
    }
}
