//! Incremental synchronisation of parsed models into a property graph.
//!
//! [`ModelUpdater`] is the entry point. Metamodel packages are registered
//! as type and package nodes; each changed file is then either inserted in
//! bulk ([`batch`]), patched transactionally ([`delta`]) or removed
//! ([`deletion`]). References into files that are not indexed yet are kept
//! as pending proxies ([`proxy`]) and materialised by a later fix-up pass,
//! after which stale derived attributes are recomputed ([`derived`]).

pub mod batch;
pub mod deletion;
pub mod delta;
pub mod derived;
pub mod error;
pub mod listener;
pub mod metamodel;
pub mod metrics;
pub mod options;
pub mod proxy;
pub mod schema;
pub mod slot;
pub mod type_cache;
pub mod updater;
pub mod vcs;

pub use batch::{BatchInjector, InjectionReport};
pub use deletion::{DeletionEngine, DeletionSummary};
pub use delta::{classify, Classification, DeltaSynchronizer, PatchSummary, SyncOutcome};
pub use derived::{
    AccessRecord, DerivationEvaluator, DerivationRegistry, DerivationReport, DerivationScheduler,
    DerivedAttribute, DirtyTracker,
};
pub use error::{Result, SyncError};
pub use listener::{ChangeListener, CompositeListener, NoopListener};
pub use metamodel::{
    DerivedAttributeSpec, MetamodelRegistrar, RegistrationReport, RemovalReport,
};
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, SyncMetrics};
pub use options::{ConfigError, SyncOptions};
pub use proxy::{ProxyLedger, ProxyReference, ProxyResolutionReport};
pub use slot::{Derivation, SlotDescriptor, SlotKind, SlotMap};
pub use type_cache::TypeCache;
pub use updater::{ApplyReport, ChangeSetReport, FileReport, FixupReport, ModelUpdater};
pub use vcs::{ChangeKind, FileChange, VcsChangeItem};
