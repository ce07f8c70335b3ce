//! Resolution of the client-visible namespace.
//!
//! The cell name, dynamic-root mode and afs root directory are stable for
//! the lifetime of a run, so they are probed once and cached on the
//! resolver instance. Paths come in several addressing conventions: the
//! plain path, the per-cell read-write shadow tree (`/afs/.<cell>`), and
//! the synthetic dynamic-root tree (`/afs/.:mount/<cell>:<volume>`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::facts::Facts;
use lazy_static::lazy_static;
use log::info;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::NamespaceError;
use crate::fscli::FsCli;
use crate::probe::PathProbe;

lazy_static! {
    static ref CACHEINFO: Regex = Regex::new(r"(.*):(.*):(.*)").unwrap();
}

pub struct NamespaceResolver {
    fs: FsCli,
    facts: Facts,
    probe: Arc<dyn PathProbe>,
    cell: OnceCell<String>,
    dynroot: OnceCell<bool>,
    afsroot: OnceCell<PathBuf>,
}

impl NamespaceResolver {
    pub fn new(fs: FsCli, facts: Facts, probe: Arc<dyn PathProbe>) -> NamespaceResolver {
        NamespaceResolver {
            fs,
            facts,
            probe,
            cell: OnceCell::new(),
            dynroot: OnceCell::new(),
            afsroot: OnceCell::new(),
        }
    }

    pub fn probe(&self) -> &dyn PathProbe {
        self.probe.as_ref()
    }

    /// The local cell name, from `fs wscell`.
    pub fn cell_name(&self) -> Result<&str, NamespaceError> {
        self.cell
            .get_or_try_init(|| {
                let cell = self.fs.wscell()?;
                info!("cell name is '{cell}'");
                Ok(cell)
            })
            .map(String::as_str)
    }

    /// Whether the cache manager runs in dynamic-root mode.
    ///
    /// Stat a vnode inside the root.cell volume through the synthetic
    /// mount tree: with dynroot off the access fails with ENODEV. The
    /// synthetic directory itself resolves either way, so the probe must
    /// reach into the volume. Assumes root.cell already exists, which
    /// holds for any client that came up without dynroot.
    pub fn dynroot(&self) -> Result<bool, NamespaceError> {
        self.dynroot
            .get_or_try_init(|| {
                let cell = self.cell_name()?.to_string();
                let root = self.afs_root()?.to_path_buf();
                let path = root.join(".:mount").join(format!("{cell}:root.cell")).join(".");
                let enabled = match self.probe.stat(&path) {
                    Ok(()) => true,
                    Err(e) if e.raw_os_error() == Some(libc::ENODEV) => false,
                    Err(e) => {
                        return Err(NamespaceError::Io {
                            path: path.clone(),
                            source: e,
                        });
                    }
                };
                info!(
                    "dynroot is {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                Ok(enabled)
            })
            .copied()
    }

    /// The afs root directory, conventionally `/afs`, parsed from the
    /// first field of the client cacheinfo record.
    pub fn afs_root(&self) -> Result<&Path, NamespaceError> {
        self.afsroot
            .get_or_try_init(|| {
                let etc = self.facts.lookup_directory("viceetcdir")?;
                let path = etc.join("cacheinfo");
                let cacheinfo = fs::read_to_string(&path).map_err(|e| NamespaceError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                let root = CACHEINFO
                    .captures(&cacheinfo)
                    .map(|c| c[1].to_string())
                    .filter(|m| !m.is_empty())
                    .ok_or(NamespaceError::Cacheinfo(path))?;
                Ok(PathBuf::from(root))
            })
            .map(PathBuf::as_path)
    }

    /// The canonical and read-write shadow anchors of a cell under the
    /// afs root: `<root>/<cell>` and `<root>/.<cell>`.
    pub fn cell_anchors(&self, cell: &str) -> Result<(PathBuf, PathBuf), NamespaceError> {
        let root = self.afs_root()?;
        Ok((root.join(cell), root.join(format!(".{cell}"))))
    }

    /// The synthetic dynamic-root path of a volume:
    /// `<root>/.:mount/<cell>:<volume>`.
    pub fn synthetic_mount(&self, cell: &str, volume: &str) -> Result<PathBuf, NamespaceError> {
        Ok(self
            .afs_root()?
            .join(".:mount")
            .join(format!("{cell}:{volume}")))
    }

    /// The read-write shadow spelling of a path under the local cell's
    /// canonical tree, whether or not it exists on disk.
    pub fn readwrite_candidate(&self, path: &Path) -> Result<Option<PathBuf>, NamespaceError> {
        let (canonical, shadow) = {
            let cell = self.cell_name()?.to_string();
            self.cell_anchors(&cell)?
        };
        match path.strip_prefix(&canonical) {
            Ok(rest) if rest.as_os_str().is_empty() => Ok(Some(shadow)),
            Ok(rest) => Ok(Some(shadow.join(rest))),
            Err(_) => Ok(None),
        }
    }

    /// The read-write variant of a path, when the shadow tree exists on
    /// disk. The read-write tree is preferred whenever present.
    pub fn readwrite_variant(&self, path: &Path) -> Result<Option<PathBuf>, NamespaceError> {
        match self.readwrite_candidate(path)? {
            Some(candidate) if self.probe.exists(&candidate) => Ok(Some(candidate)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::exec::{CmdOutput, CommandRunner, ExecError};
    use std::collections::HashSet;
    use std::io;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct ScriptedRunner;

    impl CommandRunner for ScriptedRunner {
        fn run(&self, argv: &[String]) -> Result<CmdOutput, ExecError> {
            assert_eq!(argv[1], "wscell");
            Ok(CmdOutput {
                status: 0,
                stdout: "This workstation belongs to cell 'example.com'\n".to_string(),
                stderr: String::new(),
            })
        }
    }

    struct FakeProbe {
        existing: Mutex<HashSet<PathBuf>>,
        dynroot: bool,
    }

    impl FakeProbe {
        fn new(dynroot: bool, existing: &[&str]) -> Arc<FakeProbe> {
            Arc::new(FakeProbe {
                existing: Mutex::new(existing.iter().map(PathBuf::from).collect()),
                dynroot,
            })
        }
    }

    impl PathProbe for FakeProbe {
        fn exists(&self, path: &Path) -> bool {
            self.existing.lock().unwrap().contains(path)
        }

        fn stat(&self, _path: &Path) -> io::Result<()> {
            if self.dynroot {
                Ok(())
            } else {
                Err(io::Error::from_raw_os_error(libc::ENODEV))
            }
        }
    }

    fn resolver(dynroot: bool, existing: &[&str]) -> (NamespaceResolver, tempfile::TempDir) {
        let etc = tempfile::tempdir().unwrap();
        std::fs::write(etc.path().join("cacheinfo"), "/afs:/var/cache/openafs:50000\n").unwrap();
        let mut facts = Facts::default();
        facts
            .dirs
            .insert("viceetcdir".to_string(), etc.path().to_path_buf());
        let fs = FsCli::new(Arc::new(ScriptedRunner), PathBuf::from("fs"));
        (
            NamespaceResolver::new(fs, facts, FakeProbe::new(dynroot, existing)),
            etc,
        )
    }

    #[test]
    fn afs_root_from_cacheinfo() {
        let (ns, _etc) = resolver(false, &[]);
        assert_eq!(ns.afs_root().unwrap(), Path::new("/afs"));
    }

    #[test]
    fn malformed_cacheinfo_is_fatal() {
        let etc = tempfile::tempdir().unwrap();
        std::fs::write(etc.path().join("cacheinfo"), "garbage\n").unwrap();
        let mut facts = Facts::default();
        facts
            .dirs
            .insert("viceetcdir".to_string(), etc.path().to_path_buf());
        let fs = FsCli::new(Arc::new(ScriptedRunner), PathBuf::from("fs"));
        let ns = NamespaceResolver::new(fs, facts, FakeProbe::new(false, &[]));
        assert!(matches!(
            ns.afs_root(),
            Err(NamespaceError::Cacheinfo(_))
        ));
    }

    #[test]
    fn dynroot_follows_the_probe() {
        let (ns, _etc) = resolver(true, &[]);
        assert!(ns.dynroot().unwrap());
        let (ns, _etc) = resolver(false, &[]);
        assert!(!ns.dynroot().unwrap());
    }

    #[test]
    fn readwrite_variant_prefers_the_shadow_tree() {
        let (ns, _etc) = resolver(false, &["/afs/.example.com/test"]);
        let got = ns
            .readwrite_variant(Path::new("/afs/example.com/test"))
            .unwrap();
        assert_eq!(got, Some(PathBuf::from("/afs/.example.com/test")));

        // shadow tree absent on disk
        let got = ns
            .readwrite_variant(Path::new("/afs/example.com/other"))
            .unwrap();
        assert_eq!(got, None);

        // outside the cell tree entirely
        let got = ns.readwrite_variant(Path::new("/afs/other.org/test")).unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn synthetic_mount_path() {
        let (ns, _etc) = resolver(true, &[]);
        assert_eq!(
            ns.synthetic_mount("example.com", "root.afs").unwrap(),
            PathBuf::from("/afs/.:mount/example.com:root.afs")
        );
    }
}
