//! Wrappers over the `fs` command.
//!
//! Unlike the database operations, `fs` commands run against the local
//! cache manager and are not retried: a failure is either a programming
//! error or a broken client, and both are fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::exec::{CommandRunner, Executor};
use common::types::DirAcl;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::error::NamespaceError;

lazy_static! {
    static ref WSCELL: Regex =
        Regex::new(r"This workstation belongs to cell '(.*)'").unwrap();
    static ref ACL_ENTRY: Regex = Regex::new(r"^  (\S+) (\S+)").unwrap();
    static ref FID: Regex = Regex::new(r"File .* \((\d+)\.\d+\.\d+\)").unwrap();
    static ref VOLUME_STATUS: Regex =
        Regex::new(r"Volume status for vid = (\d+) named (\S+)").unwrap();
}

#[derive(Clone)]
pub struct FsCli {
    exec: Executor,
    fs: PathBuf,
}

impl FsCli {
    pub fn new(runner: Arc<dyn CommandRunner>, fs: PathBuf) -> FsCli {
        FsCli {
            exec: Executor::new(runner),
            fs,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, NamespaceError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.fs.to_string_lossy().into_owned());
        argv.extend(args.iter().map(|s| s.to_string()));
        let out = self.exec.run_once(&argv)?;
        Ok(out.stdout)
    }

    /// The cell this workstation belongs to.
    pub fn wscell(&self) -> Result<String, NamespaceError> {
        let out = self.run(&["wscell"])?;
        WSCELL
            .captures(&out)
            .map(|c| c[1].to_string())
            .ok_or(NamespaceError::CellName)
    }

    /// The normal and negative access lists of a directory.
    pub fn listacl(&self, path: &Path) -> Result<DirAcl, NamespaceError> {
        let out = self.run(&["listacl", "-path", &path.to_string_lossy()])?;
        let mut acl = DirAcl::default();
        let mut negative = false;
        for line in out.lines() {
            if line == "Normal rights:" {
                negative = false;
                continue;
            }
            if line == "Negative rights:" {
                negative = true;
                continue;
            }
            if let Some(c) = ACL_ENTRY.captures(line) {
                let rights = c[2].chars().collect();
                let map = if negative {
                    &mut acl.negative
                } else {
                    &mut acl.normal
                };
                map.insert(c[1].to_string(), rights);
            }
        }
        Ok(acl)
    }

    /// Replace or amend the access list on a directory. Terms are
    /// (principal, rights) pairs as accepted by `fs setacl`.
    pub fn setacl(
        &self,
        dir: &Path,
        terms: &[(String, String)],
        clear: bool,
    ) -> Result<(), NamespaceError> {
        let dir = dir.to_string_lossy().into_owned();
        let mut args = vec!["setacl"];
        if clear {
            args.push("-clear");
        }
        args.extend(["-dir", dir.as_str(), "-acl"]);
        for (principal, rights) in terms {
            args.push(principal);
            args.push(rights);
        }
        self.run(&args)?;
        Ok(())
    }

    pub fn mkmount(
        &self,
        dir: &Path,
        volume: &str,
        cell: Option<&str>,
        rw: bool,
    ) -> Result<(), NamespaceError> {
        let dir = dir.to_string_lossy().into_owned();
        let mut args = vec!["mkmount", "-dir", dir.as_str(), "-vol", volume];
        if let Some(cell) = cell {
            args.extend(["-cell", cell]);
        }
        if rw {
            args.push("-rw");
        }
        self.run(&args)?;
        Ok(())
    }

    pub fn rmmount(&self, dir: &Path) -> Result<(), NamespaceError> {
        self.run(&["rmmount", "-dir", &dir.to_string_lossy()])?;
        Ok(())
    }

    /// The id of the volume containing a path, from `fs getfid`.
    pub fn volume_id(&self, path: &Path) -> Result<u64, NamespaceError> {
        let out = self.run(&["getfid", "-path", &path.to_string_lossy()])?;
        FID.captures(&out)
            .and_then(|c| c[1].parse().ok())
            .ok_or_else(|| NamespaceError::ParentVolume(path.to_path_buf()))
    }

    /// Whether a path resolves into a read-only or backup volume.
    pub fn is_read_only(&self, path: &Path) -> Result<bool, NamespaceError> {
        let out = self.run(&["examine", "-path", &path.to_string_lossy()])?;
        let name = VOLUME_STATUS
            .captures(&out)
            .map(|c| c[2].to_string())
            .ok_or_else(|| NamespaceError::Examine(path.to_path_buf()))?;
        debug!("examine: path={} volume={name}", path.display());
        Ok(name.ends_with(".readonly") || name.ends_with(".backup"))
    }

    /// Flush cached volume information so released volumes become visible.
    pub fn check_volumes(&self) -> Result<(), NamespaceError> {
        self.run(&["checkv"])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::exec::{CmdOutput, ExecError};
    use std::sync::Mutex;

    struct ScriptedRunner {
        calls: Mutex<Vec<Vec<String>>>,
        respond: Box<dyn Fn(&[String]) -> CmdOutput>,
    }

    impl ScriptedRunner {
        fn new(respond: impl Fn(&[String]) -> CmdOutput + 'static) -> Arc<ScriptedRunner> {
            Arc::new(ScriptedRunner {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, argv: &[String]) -> Result<CmdOutput, ExecError> {
            self.calls.lock().unwrap().push(argv.to_vec());
            Ok((self.respond)(argv))
        }
    }

    fn ok(stdout: &str) -> CmdOutput {
        CmdOutput {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn wscell_extracts_the_cell_name() {
        let runner =
            ScriptedRunner::new(|_| ok("This workstation belongs to cell 'example.com'\n"));
        let fs = FsCli::new(runner, PathBuf::from("fs"));
        assert_eq!(fs.wscell().unwrap(), "example.com");
    }

    #[test]
    fn listacl_builds_both_maps() {
        const OUT: &str = "\
Access list for /afs/example.com/test is
Normal rights:
  system:administrators rlidwka
  system:anyuser rl
Negative rights:
  baduser rl
";
        let runner = ScriptedRunner::new(|_| ok(OUT));
        let fs = FsCli::new(runner, PathBuf::from("fs"));
        let acl = fs.listacl(Path::new("/afs/example.com/test")).unwrap();
        assert_eq!(acl.normal.len(), 2);
        assert_eq!(
            acl.normal["system:anyuser"],
            ['r', 'l'].into_iter().collect()
        );
        assert_eq!(acl.negative.len(), 1);
        assert!(acl.negative.contains_key("baduser"));
    }

    #[test]
    fn volume_id_from_getfid() {
        let runner = ScriptedRunner::new(|_| {
            ok("File /afs/.example.com (536870918.1.1) located in cell example.com\n")
        });
        let fs = FsCli::new(runner, PathBuf::from("fs"));
        assert_eq!(
            fs.volume_id(Path::new("/afs/.example.com")).unwrap(),
            536870918
        );
    }

    #[test]
    fn read_only_volume_names() {
        let runner = ScriptedRunner::new(|_| {
            ok("Volume status for vid = 536870916 named root.afs.readonly\n")
        });
        let fs = FsCli::new(runner, PathBuf::from("fs"));
        assert!(fs.is_read_only(Path::new("/afs")).unwrap());
    }

    #[test]
    fn setacl_term_ordering() {
        let runner = ScriptedRunner::new(|_| ok(""));
        let fs = FsCli::new(runner.clone(), PathBuf::from("fs"));
        fs.setacl(
            Path::new("/afs/example.com/test"),
            &[
                ("system:anyuser".to_string(), "rl".to_string()),
                ("bob".to_string(), "all".to_string()),
            ],
            true,
        )
        .unwrap();
        let argv = runner.calls.lock().unwrap()[0].clone();
        let expected: Vec<String> = [
            "fs",
            "setacl",
            "-clear",
            "-dir",
            "/afs/example.com/test",
            "-acl",
            "system:anyuser",
            "rl",
            "bob",
            "all",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(argv, expected);
    }
}
