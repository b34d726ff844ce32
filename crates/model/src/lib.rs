//! Puzzle hunt document model.
//!
//! A hunt is a tree of rounds and puzzles stored in a multi-writer
//! replicated document:
//!
//! - [`Snapshot`]: an immutable tree with structural sharing
//! - [`Change`]: insert / delete / move edits, applied in atomic batches
//! - [`ReplicatedDocument`]: the document seen by one client, with
//!   synchronous change notifications
//! - [`NodeHandle`]: typed, snapshot-bound views produced by [`resolve`]
//! - [`Puzzlehunt`]: the typed edit surface used by commands and the
//!   reconciler
//!
//! # Example
//!
//! ```ignore
//! use belle_model::{InMemoryDocumentService, Puzzlehunt};
//!
//! let service = InMemoryDocumentService::new();
//! let hunt = Puzzlehunt::create(&service).await?;
//! let round = hunt.add_round("Intro", "https://hunt.example/intro", None)?;
//! hunt.add_puzzle("Mind Bender!", "https://hunt.example/mb", &round)?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod delta;
pub mod document;
pub mod error;
pub mod handle;
pub mod hunt;
pub mod schema;
pub mod snapshot;

pub use delta::{ChangeNotification, Delta};
pub use document::{
    ChangeSink, DocumentId, DocumentService, InMemoryDocument, InMemoryDocumentService,
    ReplicatedDocument,
};
pub use error::{Error, Result};
pub use handle::{
    resolve, walk, LeafHandle, NodeHandle, PuzzleAssociation, PuzzleHandle, RoundAssociation,
    RoundHandle,
};
pub use hunt::{LoggingChannels, Puzzlehunt};
pub use snapshot::{
    BuildNode, Change, Definition, NodeId, Payload, RawNode, Snapshot, StableRange, TraitLocation,
};
