//! Error taxonomy for the synchronisation layer.

use thiserror::Error;

use crate::graph::GraphError;
use crate::model::ClassKey;
use crate::types::NodeId;

/// Errors raised while synchronising models into the graph.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An object's metaclass has no registered type node.
    #[error("metaclass {0} is not registered")]
    UnregisteredMetaclass(ClassKey),
    /// A class refers to a package that has not been registered yet.
    #[error("metaclass {class} depends on unregistered package {package}")]
    UnresolvedMetamodelDependency {
        /// Class being registered.
        class: ClassKey,
        /// Missing package URI.
        package: String,
    },
    /// A proxy resolution found the edge already materialised.
    #[error("edge {label} from {from} to {to} already exists")]
    ProxyResolutionConflict {
        /// Source node.
        from: NodeId,
        /// Target node.
        to: NodeId,
        /// Edge label.
        label: String,
    },
    /// A batch insertion failed and its partial subgraph was removed.
    #[error("insertion of {path} failed and was compensated")]
    PartialInsertionFailure {
        /// File whose insertion failed.
        path: String,
        /// Failure that interrupted the insertion.
        #[source]
        cause: Box<SyncError>,
    },
    /// The backend rejected a write inside a unit of work, which was rolled back.
    #[error("transaction for {unit} aborted")]
    TransactionAborted {
        /// Description of the unit of work.
        unit: String,
        /// Backend failure.
        #[source]
        cause: GraphError,
    },
    /// No package node exists for the URI.
    #[error("metamodel {0} is not registered")]
    MetamodelNotFound(String),
    /// No class of that name exists in the package.
    #[error("type {name} not found in metamodel {package}")]
    TypeNotFound {
        /// Package URI.
        package: String,
        /// Class name.
        name: String,
    },
    /// The type declares no such feature.
    #[error("feature {feature} not found on {class}")]
    FeatureNotFound {
        /// Declaring class.
        class: ClassKey,
        /// Feature name.
        feature: String,
    },
    /// A slot cannot be used for the requested operation.
    #[error("invalid slot: {0}")]
    InvalidSlot(String),
    /// No evaluator is registered for a derivation language.
    #[error("no derivation evaluator registered for language {0}")]
    MissingEvaluator(String),
    /// A derivation evaluator failed.
    #[error("derivation in {language} failed: {message}")]
    Evaluation {
        /// Derivation language.
        language: String,
        /// Evaluator message.
        message: String,
    },
    /// Graph state contradicts the engine's invariants.
    #[error("corrupted graph state: {0}")]
    Corrupted(String),
    /// Stored JSON payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
    /// Backend failure outside a unit of work.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Result alias for synchronisation operations.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Fatal errors must stop the whole change set; every other error is
    /// confined to the file or chunk that raised it.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Graph(GraphError::Unavailable(_)) => true,
            SyncError::TransactionAborted {
                cause: GraphError::Unavailable(_),
                ..
            } => true,
            SyncError::Corrupted(_) => true,
            SyncError::PartialInsertionFailure { cause, .. } => cause.is_fatal(),
            _ => false,
        }
    }

    /// Wraps backend write failures of a rolled-back unit; other errors pass
    /// through unchanged.
    pub(crate) fn aborted(unit: impl Into<String>, err: SyncError) -> SyncError {
        match err {
            SyncError::Graph(cause) => SyncError::TransactionAborted {
                unit: unit.into(),
                cause,
            },
            other => other,
        }
    }

    /// Attributes a failure raised while evaluating `language` to that
    /// language. Fatal errors and evaluation errors pass through.
    pub(crate) fn into_evaluation(self, language: &str) -> SyncError {
        match self {
            err @ SyncError::Evaluation { .. } => err,
            err if err.is_fatal() => err,
            other => SyncError::Evaluation {
                language: language.to_owned(),
                message: other.to_string(),
            },
        }
    }
}
