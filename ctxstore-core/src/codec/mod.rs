//! Payload codecs.
//!
//! Both codecs lay out fixed-size elements with no framing. Element counts
//! always come from [`PayloadShape`](crate::format::PayloadShape) so the
//! inspector and the codecs agree on every payload size.

use std::io;

use crate::error::{Stage, StoreError};
use crate::model::AllocError;

/// Hash-table payloads.
pub mod hash;

/// Dense counter-array payloads.
pub mod array;

/// Elements encoded per `write_all` / `read_exact` call.
const CHUNK: usize = 4096;

fn payload_io(err: io::Error) -> StoreError {
	StoreError::io(Stage::Payload, err)
}

fn payload_alloc(err: AllocError) -> StoreError {
	StoreError::resource(Stage::Payload, err.requested)
}
