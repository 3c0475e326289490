//! Domain layer: topic keys, the envelope codec, options and errors.

pub mod envelope;
pub mod errors;
pub mod key;
pub mod options;

pub use envelope::{decode, encode, Envelope, ENVELOPE_FORMAT};
pub use errors::{HandlerError, QueueError, RouterError};
pub use key::{KeyPart, StorageKey, TopicId, TopicKey};
pub use options::EnqueueOptions;
