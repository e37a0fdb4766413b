use std::io::{Read, Write};

use super::{payload_alloc, payload_io};
use crate::error::{FormatError, Result, Stage, StoreError};
use crate::format::{ARRAY_COUNTER_LEN, ArrayCounter, PayloadShape};
use crate::model::{AllocError, CounterArray};

fn counter_count(slots: u64) -> Result<usize> {
	PayloadShape::Array { slots }
		.element_count_usize()
		.map_err(|err| StoreError::format(Stage::Payload, err))
}

/// Writes the `slots x 4` counters of an array, flat.
///
/// # Errors
/// - `FormatError::ArrayShape` if the array does not hold four counters per slot
/// - I/O error on a short write
pub fn write_counter_array<W: Write>(writer: &mut W, array: &CounterArray, slots: u64) -> Result<()> {
	let expected = counter_count(slots)?;
	if array.counters().len() != expected {
		return Err(StoreError::format(
			Stage::Payload,
			FormatError::ArrayShape { counters: array.counters().len(), slots },
		));
	}

	let mut buf = Vec::with_capacity(ARRAY_COUNTER_LEN * super::CHUNK);
	for counters in array.counters().chunks(super::CHUNK) {
		buf.clear();
		for counter in counters {
			buf.extend_from_slice(&counter.to_le_bytes());
		}
		writer.write_all(&buf).map_err(payload_io)?;
	}
	Ok(())
}

/// Reads exactly `slots x 4` counters.
///
/// A truncated payload is an I/O error, never a zero-filled tail.
pub fn read_counter_array<R: Read>(reader: &mut R, slots: u64) -> Result<CounterArray> {
	let len = counter_count(slots)?;
	let mut counters: Vec<ArrayCounter> = Vec::new();
	counters
		.try_reserve_exact(len)
		.map_err(|_| payload_alloc(AllocError { requested: len }))?;

	// Filled only from bytes actually read, so a short file stops early.
	let mut buf = vec![0u8; ARRAY_COUNTER_LEN * super::CHUNK.min(len)];
	while counters.len() < len {
		let cells = (len - counters.len()).min(super::CHUNK);
		let bytes = &mut buf[..cells * ARRAY_COUNTER_LEN];
		reader.read_exact(bytes).map_err(payload_io)?;
		counters.extend(
			bytes
				.chunks_exact(ARRAY_COUNTER_LEN)
				.map(|pair| ArrayCounter::from_le_bytes([pair[0], pair[1]])),
		);
	}
	Ok(CounterArray::from_counters(counters))
}
