#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `protocol` implements the wire-level pieces shared by every dpi daemon:
//! the tagged record format exchanged with the browser, the shared-key
//! authentication check performed on the first record of each connection, and
//! parsing of the `<scheme>:<path>[?<query>]` resource identifiers carried in
//! request records.
//!
//! # Design
//!
//! - [`Record`] is an ordered list of `key='value'` attributes.
//!   [`RecordDecoder`] reassembles records from arbitrarily fragmented reads,
//!   which the non-blocking reactor needs because a record may straddle two
//!   readiness events.
//! - [`Authenticator`] is the seam between the connection state machine and
//!   the credential source. [`SharedKeyAuthenticator`] reads the launcher's
//!   keys file.
//! - [`ResourceId`] normalises a request url into raw path bytes plus an
//!   optional query.
//!
//! # Invariants
//!
//! - [`Record::encode`] output always decodes back to an equal record.
//! - A decoder never buffers more than [`MAX_RECORD_LEN`] bytes of a single
//!   unfinished record.
//! - Authentication compares keys without short-circuiting on the first
//!   mismatching byte.
//!
//! # Examples
//!
//! ```
//! use protocol::{Record, RecordDecoder};
//!
//! let wire = Record::open_url("file:/tmp").encode();
//! let mut decoder = RecordDecoder::new();
//! decoder.feed(&wire[..5]);
//! assert!(decoder.next_record().unwrap().is_none());
//! decoder.feed(&wire[5..]);
//! let record = decoder.next_record().unwrap().unwrap();
//! assert_eq!(record.get("url"), Some("file:/tmp"));
//! ```

mod auth;
mod record;
mod resource;

pub use auth::{AuthError, Authenticator, SharedKeyAuthenticator, default_keys_path};
pub use record::{MAX_RECORD_LEN, Record, RecordDecoder, RecordError, command};
pub use resource::{ResourceError, ResourceId};
