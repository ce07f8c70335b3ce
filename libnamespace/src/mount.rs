//! Mount point management.
//!
//! Mount points are directory entries inside another volume, so creating
//! or removing one mutates the parent volume: the mutation happens under
//! temporarily elevated rights, and the parent is released afterwards so
//! the change becomes visible cell-wide. The two cell-anchoring volumes
//! are special: root.afs is addressed implicitly at the filesystem root,
//! and root.cell is reached through the synthetic dynamic-root path when
//! the plain path is not backed by a real directory.

use std::path::{Path, PathBuf};

use log::info;

use libvldb::VosClient;

use crate::error::NamespaceError;
use crate::fscli::FsCli;
use crate::resolver::NamespaceResolver;
use crate::rights::with_extra_rights;

pub const ROOT_VOLUME: &str = "root.afs";
pub const CELL_VOLUME: &str = "root.cell";

#[derive(Debug, Clone, Default)]
pub struct MountOutcome {
    pub changed: bool,
    pub mount: Option<PathBuf>,
}

pub struct MountManager<'a> {
    fs: &'a FsCli,
    vos: &'a VosClient,
    ns: &'a NamespaceResolver,
}

fn split_dir(path: &Path) -> Result<(PathBuf, String), NamespaceError> {
    let parent = path
        .parent()
        .ok_or_else(|| NamespaceError::MountPath(path.to_path_buf()))?;
    let leaf = path
        .file_name()
        .ok_or_else(|| NamespaceError::MountPath(path.to_path_buf()))?;
    Ok((parent.to_path_buf(), leaf.to_string_lossy().into_owned()))
}

impl<'a> MountManager<'a> {
    pub fn new(fs: &'a FsCli, vos: &'a VosClient, ns: &'a NamespaceResolver) -> MountManager<'a> {
        MountManager { fs, vos, ns }
    }

    /// Create the mount point for a volume, and the read-write shadow
    /// mount when the volume is root.cell or the caller asks for one.
    pub fn mount(
        &self,
        volume: &str,
        path: &Path,
        cell: Option<&str>,
        rw: bool,
    ) -> Result<MountOutcome, NamespaceError> {
        info!(
            "mount(volume='{volume}', path='{}', cell={cell:?}, rw={rw})",
            path.display()
        );
        let afsroot = self.ns.afs_root()?.to_path_buf();
        let local_cell = self.ns.cell_name()?.to_string();
        let dynroot = self.ns.dynroot()?;
        let mut outcome = MountOutcome::default();

        // root.afs is addressed implicitly; its vnodes are reachable
        // through the synthetic tree when needed.
        if volume == ROOT_VOLUME && path == afsroot {
            info!("skipping root.afs mount on '{}'", path.display());
            return Ok(outcome);
        }

        let mut path = path.to_path_buf();
        let mut vcell = cell.map(str::to_string);
        if volume == CELL_VOLUME {
            // root.cell always gets a cellular mount point.
            let vc = vcell.get_or_insert_with(|| local_cell.clone()).clone();
            let (canonical, canonical_rw) = self.ns.cell_anchors(&vc)?;
            if (path == canonical || path == canonical_rw) && dynroot {
                path = self.ns.synthetic_mount(&vc, ROOT_VOLUME)?.join(&vc);
                info!(
                    "mounting volume '{volume}' with dynroot path '{}'",
                    path.display()
                );
            }
        }

        // Prefer the read-write tree for the parent when it exists.
        let (mut parent, leaf) = split_dir(&path)?;
        if let Some(parent_rw) = self.ns.readwrite_variant(&parent)? {
            parent = parent_rw;
            info!(
                "mounting volume '{volume}' with read/write path '{}'",
                parent.join(&leaf).display()
            );
        }

        let mut parent_changed = false;

        let regular = parent.join(&leaf);
        if !self.ns.probe().exists(&regular) {
            info!(
                "creating new mount point '{}' for volume '{volume}'",
                regular.display()
            );
            with_extra_rights(self.fs, &parent, "ia", || {
                self.fs.mkmount(&regular, volume, vcell.as_deref(), false)
            })?;
            outcome.changed = true;
            outcome.mount = Some(regular.clone());
            parent_changed = true;
        }

        if volume == CELL_VOLUME || rw {
            let shadow = parent.join(format!(".{leaf}"));
            if !self.ns.probe().exists(&shadow) {
                info!(
                    "creating new mount point '{}' for volume '{volume}'",
                    shadow.display()
                );
                with_extra_rights(self.fs, &parent, "ia", || {
                    self.fs.mkmount(&shadow, volume, vcell.as_deref(), true)
                })?;
                outcome.changed = true;
                outcome.mount = Some(shadow);
                parent_changed = true;
            }
        }

        if parent_changed {
            self.release_parent(&parent)?;
        }
        Ok(outcome)
    }

    /// Remove the regular and read-write mount points of a volume.
    /// Unmounting root.afs is always a no-op.
    pub fn unmount(&self, volume: &str, path: &Path) -> Result<MountOutcome, NamespaceError> {
        info!("unmount(volume='{volume}', path='{}')", path.display());
        let local_cell = self.ns.cell_name()?.to_string();
        let dynroot = self.ns.dynroot()?;
        let mut outcome = MountOutcome::default();

        if !self.ns.probe().exists(path) {
            info!("mount '{}' already absent", path.display());
            return Ok(outcome);
        }

        if volume == ROOT_VOLUME {
            info!("skipping rmmount of root.afs");
            return Ok(outcome);
        }

        let mut path = path.to_path_buf();
        if volume == CELL_VOLUME && dynroot {
            let (canonical, canonical_rw) = self.ns.cell_anchors(&local_cell)?;
            if path == canonical || path == canonical_rw {
                path = self
                    .ns
                    .synthetic_mount(&local_cell, ROOT_VOLUME)?
                    .join(&local_cell);
                info!(
                    "unmounting volume '{volume}' with dynroot path '{}'",
                    path.display()
                );
            }
        }

        let (mut parent, leaf) = split_dir(&path)?;
        if let Some(parent_rw) = self.ns.readwrite_variant(&parent)? {
            parent = parent_rw;
            info!(
                "unmounting volume '{volume}' with read/write parent path '{}'",
                parent.display()
            );
        }

        let mut parent_changed = false;
        for target in [parent.join(&leaf), parent.join(format!(".{leaf}"))] {
            if self.ns.probe().exists(&target) {
                with_extra_rights(self.fs, &parent, "d", || self.fs.rmmount(&target))?;
                info!("removed mount '{}'", target.display());
                outcome.changed = true;
                parent_changed = true;
            }
        }

        if parent_changed {
            self.release_parent(&parent)?;
        }
        Ok(outcome)
    }

    /// Release the volume containing the parent directory so the change
    /// is visible on the read-only paths too.
    fn release_parent(&self, parent: &Path) -> Result<(), NamespaceError> {
        let parent_id = self.fs.volume_id(parent)?;
        info!("releasing parent volume '{parent_id}'");
        self.vos.release(&parent_id.to_string())?;
        self.fs.check_volumes()?;
        Ok(())
    }
}
