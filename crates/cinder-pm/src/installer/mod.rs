// Transaction orchestrator
//
// Takes resolver output and realizes it: matches packages to
// repository artifacts, downloads and verifies them in parallel,
// unpacks into the target root, keeps the installed database in sync
// and runs finalizers in dependency order. Artifact transport,
// unpacking and finalizer execution live behind collaborator traits.

#[allow(clippy::module_inception)]
mod installer;
mod repository;
mod system;

pub use installer::{order_files, Installer, InstallerOptions};
pub use repository::{Artifact, ArtifactMatch, Client, PackageMatch, Repositories, Repository};
pub use system::{
    ConfigProtect, FinalizerRunner, NoConfigProtect, NoopFinalizerRunner, System,
};

use std::fmt;

/// The lifecycle of a transaction, advanced by the orchestrator and
/// observable through `TransactionStateChanged` events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Building,
    Solving,
    Decoding,
    Planning,
    Downloading,
    Applying,
    Committing,
    Done,
    Aborted(String),
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Done | TransactionState::Aborted(_))
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Building => write!(f, "building"),
            TransactionState::Solving => write!(f, "solving"),
            TransactionState::Decoding => write!(f, "decoding"),
            TransactionState::Planning => write!(f, "planning"),
            TransactionState::Downloading => write!(f, "downloading"),
            TransactionState::Applying => write!(f, "applying"),
            TransactionState::Committing => write!(f, "committing"),
            TransactionState::Done => write!(f, "done"),
            TransactionState::Aborted(kind) => write!(f, "aborted ({kind})"),
        }
    }
}
