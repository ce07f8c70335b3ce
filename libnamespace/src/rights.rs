//! Temporary rights elevation.
//!
//! Creating or removing a mount point needs rights on the parent
//! directory that the administrators group does not normally hold. The
//! helper grants the missing rights, runs the mutation, and restores the
//! previous rights on every exit path, including failure of the mutation.

use std::path::Path;

use common::types::RightsSet;
use log::{info, warn};

use crate::error::NamespaceError;
use crate::fscli::FsCli;

pub const ADMIN_GROUP: &str = "system:administrators";

fn rights_string(rights: &RightsSet) -> String {
    rights.iter().collect()
}

pub fn with_extra_rights<T>(
    fs: &FsCli,
    dir: &Path,
    rights: &str,
    f: impl FnOnce() -> Result<T, NamespaceError>,
) -> Result<T, NamespaceError> {
    let acl = fs.listacl(dir)?;
    let existing: RightsSet = acl.normal.get(ADMIN_GROUP).cloned().unwrap_or_default();
    let mut augmented = existing.clone();
    augmented.extend(rights.chars());
    let elevate = augmented != existing;

    if elevate {
        info!(
            "adding temporary rights '{} {}' to directory '{}'",
            ADMIN_GROUP,
            rights,
            dir.display()
        );
        fs.setacl(
            dir,
            &[(ADMIN_GROUP.to_string(), rights_string(&augmented))],
            false,
        )?;
    }

    let result = f();

    if elevate {
        info!(
            "removing temporary rights '{} {}' from directory '{}'",
            ADMIN_GROUP,
            rights,
            dir.display()
        );
        let restore = if existing.is_empty() {
            "none".to_string()
        } else {
            rights_string(&existing)
        };
        let restored = fs.setacl(dir, &[(ADMIN_GROUP.to_string(), restore)], false);
        if let Err(e) = restored {
            match result {
                // The mutation worked but the directory is left elevated.
                Ok(_) => return Err(e),
                Err(original) => {
                    warn!("failed to restore rights on '{}': {e}", dir.display());
                    return Err(original);
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::exec::{CmdOutput, CommandRunner, ExecError};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    struct AclRunner {
        calls: Mutex<Vec<Vec<String>>>,
        admin_rights: &'static str,
    }

    impl AclRunner {
        fn new(admin_rights: &'static str) -> Arc<AclRunner> {
            Arc::new(AclRunner {
                calls: Mutex::new(Vec::new()),
                admin_rights,
            })
        }

        fn setacl_calls(&self) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|argv| argv[1] == "setacl")
                .cloned()
                .collect()
        }
    }

    impl CommandRunner for AclRunner {
        fn run(&self, argv: &[String]) -> Result<CmdOutput, ExecError> {
            self.calls.lock().unwrap().push(argv.to_vec());
            let stdout = if argv[1] == "listacl" {
                if self.admin_rights.is_empty() {
                    "Access list for /afs/example.com is\nNormal rights:\n  system:anyuser rl\n"
                        .to_string()
                } else {
                    format!(
                        "Access list for /afs/example.com is\nNormal rights:\n  {} {}\n  system:anyuser rl\n",
                        ADMIN_GROUP, self.admin_rights
                    )
                }
            } else {
                String::new()
            };
            Ok(CmdOutput {
                status: 0,
                stdout,
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn grants_and_restores_missing_rights() {
        let runner = AclRunner::new("rl");
        let fs = FsCli::new(runner.clone(), PathBuf::from("fs"));
        let ran = with_extra_rights(&fs, Path::new("/afs/example.com"), "ia", || Ok(true)).unwrap();
        assert!(ran);
        let setacls = runner.setacl_calls();
        assert_eq!(setacls.len(), 2);
        // grant: previous rights plus the temporary ones, restore: previous
        assert_eq!(setacls[0][5], ADMIN_GROUP);
        assert_eq!(setacls[0][6], "ailr");
        assert_eq!(setacls[1][6], "lr");
    }

    #[test]
    fn restores_to_none_when_group_had_no_rights() {
        let runner = AclRunner::new("");
        let fs = FsCli::new(runner.clone(), PathBuf::from("fs"));
        with_extra_rights(&fs, Path::new("/afs/example.com"), "d", || Ok(())).unwrap();
        let setacls = runner.setacl_calls();
        assert_eq!(setacls.len(), 2);
        assert_eq!(setacls[1][6], "none");
    }

    #[test]
    fn skips_elevation_when_rights_already_present() {
        let runner = AclRunner::new("rlidwka");
        let fs = FsCli::new(runner.clone(), PathBuf::from("fs"));
        with_extra_rights(&fs, Path::new("/afs/example.com"), "ia", || Ok(())).unwrap();
        assert!(runner.setacl_calls().is_empty());
    }

    #[test]
    fn restores_even_when_the_mutation_fails() {
        let runner = AclRunner::new("rl");
        let fs = FsCli::new(runner.clone(), PathBuf::from("fs"));
        let err = with_extra_rights(&fs, Path::new("/afs/example.com"), "ia", || {
            Err::<(), _>(NamespaceError::CellName)
        })
        .unwrap_err();
        assert!(matches!(err, NamespaceError::CellName));
        assert_eq!(runner.setacl_calls().len(), 2);
    }
}
