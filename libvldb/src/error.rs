use std::time::Duration;

use common::exec::ExecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VldbError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("timed out after {0:?} waiting for database quorum")]
    QuorumTimeout(Duration),
}
