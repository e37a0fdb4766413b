use std::io::{Read, Write};

use super::{payload_alloc, payload_io};
use crate::error::{FormatError, Result, Stage, StoreError};
use crate::format::{HASH_ENTRY_LEN, HashKey, IndexSlot, PayloadShape};
use crate::model::{HashEntry, HashTable, try_filled};

const KEY_LEN: usize = std::mem::size_of::<HashKey>();

fn encode_entry(entry: &HashEntry, out: &mut Vec<u8>) {
	out.extend_from_slice(&entry.key.to_le_bytes());
	out.extend_from_slice(&entry.counters);
}

fn decode_entry(bytes: &[u8]) -> HashEntry {
	let mut key = [0u8; KEY_LEN];
	key.copy_from_slice(&bytes[..KEY_LEN]);
	let mut entry = HashEntry { key: HashKey::from_le_bytes(key), ..HashEntry::default() };
	entry.counters.copy_from_slice(&bytes[KEY_LEN..HASH_ENTRY_LEN]);
	entry
}

/// Writes the index array, then every cell of every bucket in bucket-major
/// order. Empty cells are written as zeroed entries.
///
/// # Errors
/// - `FormatError::TableShape` if the table is not `width` x `bound`
/// - I/O error on a short write
pub fn write_hash_table<W: Write>(writer: &mut W, table: &HashTable, width: u32, bound: u32) -> Result<()> {
	let shape_matches = table.width() == width as usize
		&& table.bound() == bound
		&& table.buckets().iter().all(|chain| chain.len() == bound as usize);
	if !shape_matches {
		let chain = table.buckets().first().map_or(0, Vec::len);
		return Err(StoreError::format(
			Stage::Payload,
			FormatError::TableShape { buckets: table.width(), chain, width, bound },
		));
	}

	writer.write_all(table.index()).map_err(payload_io)?;

	let mut buf = Vec::with_capacity(HASH_ENTRY_LEN * super::CHUNK);
	for chain in table.buckets() {
		for cells in chain.chunks(super::CHUNK) {
			buf.clear();
			for entry in cells {
				encode_entry(entry, &mut buf);
			}
			writer.write_all(&buf).map_err(payload_io)?;
		}
	}
	Ok(())
}

/// Reads a table of `width` buckets with chains of `bound` cells.
///
/// # Errors
/// - resource error if the index or a chain cannot be allocated
/// - I/O error on a short read
pub fn read_hash_table<R: Read>(reader: &mut R, width: u32, bound: u32) -> Result<HashTable> {
	let shape = PayloadShape::Hash { width, bound };
	shape
		.element_count_usize()
		.map_err(|err| StoreError::format(Stage::Payload, err))?;

	let mut index: Vec<IndexSlot> = try_filled(width as usize).map_err(payload_alloc)?;
	reader.read_exact(&mut index).map_err(payload_io)?;

	let mut buckets = Vec::new();
	buckets
		.try_reserve_exact(width as usize)
		.map_err(|_| StoreError::resource(Stage::Payload, width as usize))?;

	let mut buf = Vec::new();
	for _ in 0..width {
		let mut chain: Vec<HashEntry> = Vec::new();
		chain
			.try_reserve_exact(bound as usize)
			.map_err(|_| StoreError::resource(Stage::Payload, bound as usize))?;
		let mut remaining = bound as usize;
		while remaining > 0 {
			let cells = remaining.min(super::CHUNK);
			buf.resize(cells * HASH_ENTRY_LEN, 0);
			reader.read_exact(&mut buf).map_err(payload_io)?;
			chain.extend(buf.chunks_exact(HASH_ENTRY_LEN).map(decode_entry));
			remaining -= cells;
		}
		buckets.push(chain);
	}

	Ok(HashTable::from_parts(index, buckets, bound))
}
