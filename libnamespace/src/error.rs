use std::path::PathBuf;

use common::exec::ExecError;
use common::facts::FactsError;
use libvldb::VldbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Facts(#[from] FactsError),
    #[error(transparent)]
    Vldb(#[from] VldbError),
    #[error("cell name not found")]
    CellName,
    #[error("failed to parse cacheinfo file '{0}'")]
    Cacheinfo(PathBuf),
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to examine path '{0}'")]
    Examine(PathBuf),
    #[error("failed to find parent volume id for mount path '{0}'")]
    ParentVolume(PathBuf),
    #[error("invalid mount path '{0}'")]
    MountPath(PathBuf),
}
