//! On-disk records of a model file.
//!
//! ```text
//! [FormatHeader][Descriptor 0][Payload 0] ... [Descriptor n-1][Payload n-1]
//! ```
//!
//! Every record has a constant encoded size and no length prefix, so a reader
//! can skip a payload knowing only its descriptor and the header. All integers
//! are fixed-width little-endian (postcard `fixint`).

use std::io::{self, Read, Write};
use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// "MODL" read as a little-endian `u32`.
pub const MAGIC: u32 = 0x4C44_4F4D;

/// Only this exact version is accepted on load.
pub const VERSION: u32 = 1;

/// Nucleotide alphabet cardinality (A, C, G, T).
pub const ALPHABET_SIZE: u32 = 4;

/// Default number of buckets of a hash-mode model.
pub const DEFAULT_HASH_WIDTH: u32 = 1 << 20;

/// Encoded size of a [`FormatHeader`].
pub const HEADER_LEN: usize = 32;

/// Encoded size of a [`ModelDescriptor`].
pub const DESCRIPTOR_LEN: usize = 46;

/// Per-bucket index cell: number of occupied chain slots.
pub type IndexSlot = u8;
/// Context key stored in a hash entry.
pub type HashKey = u32;
/// One small counter per symbol in a hash entry.
pub type HashCounters = [u8; ALPHABET_SIZE as usize];
/// Counter cell of an array-mode model.
pub type ArrayCounter = u16;

pub const INDEX_SLOT_LEN: usize = size_of::<IndexSlot>();
pub const HASH_ENTRY_LEN: usize = size_of::<HashKey>() + size_of::<HashCounters>();
pub const ARRAY_COUNTER_LEN: usize = size_of::<ArrayCounter>();

/// Storage representation of a model payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
	Array,
	HashTable,
}

impl StorageMode {
	pub fn tag(self) -> u8 {
		match self {
			Self::Array => 0,
			Self::HashTable => 1,
		}
	}

	pub fn from_tag(tag: u8) -> Result<Self, FormatError> {
		match tag {
			0 => Ok(Self::Array),
			1 => Ok(Self::HashTable),
			other => Err(FormatError::UnknownMode(other)),
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Self::Array => "array",
			Self::HashTable => "hash table",
		}
	}
}

/// Geometry of one payload, the single source of every payload size.
///
/// The codecs allocate and count with it, and the inspector skips with
/// [`PayloadShape::byte_len`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
	Hash { width: u32, bound: u32 },
	Array { slots: u64 },
}

impl PayloadShape {
	pub fn new(mode: StorageMode, slots: u64, width: u32, bound: u32) -> Self {
		match mode {
			StorageMode::HashTable => Self::Hash { width, bound },
			StorageMode::Array => Self::Array { slots },
		}
	}

	/// Number of index cells (hash mode only).
	pub fn index_len(&self) -> u64 {
		match *self {
			Self::Hash { width, .. } => u64::from(width),
			Self::Array { .. } => 0,
		}
	}

	/// Number of fixed-size elements after the index: hash entries or counters.
	pub fn element_count(&self) -> Option<u64> {
		match *self {
			Self::Hash { width, bound } => u64::from(width).checked_mul(u64::from(bound)),
			Self::Array { slots } => slots.checked_mul(u64::from(ALPHABET_SIZE)),
		}
	}

	fn element_len(&self) -> u64 {
		match self {
			Self::Hash { .. } => HASH_ENTRY_LEN as u64,
			Self::Array { .. } => ARRAY_COUNTER_LEN as u64,
		}
	}

	/// Total encoded size in bytes, `None` on overflow.
	pub fn byte_len(&self) -> Option<u64> {
		let index = self.index_len().checked_mul(INDEX_SLOT_LEN as u64)?;
		let elements = self.element_count()?.checked_mul(self.element_len())?;
		index.checked_add(elements)
	}

	/// Element count as an in-memory length.
	pub(crate) fn element_count_usize(&self) -> Result<usize, FormatError> {
		self.element_count()
			.and_then(|n| usize::try_from(n).ok())
			.ok_or(FormatError::PayloadTooLarge)
	}
}

/// File-level header.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatHeader {
	#[serde(with = "postcard::fixint::le")]
	pub magic: u32,
	#[serde(with = "postcard::fixint::le")]
	pub version: u32,
	#[serde(with = "postcard::fixint::le")]
	pub model_count: u32,
	#[serde(with = "postcard::fixint::le")]
	pub alphabet_size: u32,
	/// Seconds since the Unix epoch at save time.
	#[serde(with = "postcard::fixint::le")]
	pub timestamp: u64,
	#[serde(with = "postcard::fixint::le")]
	pub hash_width: u32,
	/// Maximum chain length, shared by every hash-mode model of the file.
	#[serde(with = "postcard::fixint::le")]
	pub collision_bound: u32,
}

impl FormatHeader {
	/// Header for a file written now.
	pub fn current(model_count: u32, hash_width: u32, collision_bound: u32, timestamp: u64) -> Self {
		Self {
			magic: MAGIC,
			version: VERSION,
			model_count,
			alphabet_size: ALPHABET_SIZE,
			timestamp,
			hash_width,
			collision_bound,
		}
	}

	/// Checks magic, version and alphabet, in that order.
	pub fn validate(&self) -> Result<(), FormatError> {
		if self.magic != MAGIC {
			return Err(FormatError::BadMagic { found: self.magic });
		}
		if self.version != VERSION {
			return Err(FormatError::UnsupportedVersion { found: self.version });
		}
		if self.alphabet_size != ALPHABET_SIZE {
			return Err(FormatError::IncompatibleAlphabet {
				found: self.alphabet_size,
				expected: ALPHABET_SIZE,
			});
		}
		Ok(())
	}

	pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
		write_record(self, writer)
	}

	/// Reads one header. The outer `io::Result` covers short reads, the inner
	/// one undecodable bytes.
	pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Result<Self, FormatError>> {
		read_record::<Self, R, HEADER_LEN>(reader)
	}
}

/// Per-model metadata, identical for both storage modes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDescriptor {
	#[serde(with = "postcard::fixint::le")]
	pub context_order: u32,
	#[serde(with = "postcard::fixint::le")]
	pub alpha_den: u32,
	pub inverted_repeat: bool,
	#[serde(with = "postcard::fixint::le")]
	pub edit_threshold: u32,
	/// Zero whenever `edit_threshold` is zero.
	#[serde(with = "postcard::fixint::le")]
	pub edit_alpha_den: u32,
	/// Raw storage mode tag, see [`StorageMode::from_tag`].
	pub mode: u8,
	#[serde(with = "postcard::fixint::le")]
	pub slot_count: u64,
	#[serde(with = "postcard::fixint::le")]
	pub max_count: u32,
	#[serde(with = "postcard::fixint::le")]
	pub multiplier: u64,
	/// Reserved. Always written as zero and ignored on read.
	#[serde(with = "postcard::fixint::le")]
	pub payload_size: u64,
}

impl ModelDescriptor {
	pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
		write_record(self, writer)
	}

	/// Reads one descriptor, see [`FormatHeader::read_from`].
	pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Result<Self, FormatError>> {
		read_record::<Self, R, DESCRIPTOR_LEN>(reader)
	}
}

fn write_record<T: Serialize, W: Write>(record: &T, writer: &mut W) -> io::Result<()> {
	let bytes = postcard::to_stdvec(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
	writer.write_all(&bytes)
}

fn read_record<T, R, const LEN: usize>(reader: &mut R) -> io::Result<Result<T, FormatError>>
where
	T: for<'de> Deserialize<'de>,
	R: Read,
{
	let mut buf = [0u8; LEN];
	reader.read_exact(&mut buf)?;
	Ok(postcard::from_bytes(&buf).map_err(|e| FormatError::Encoding(e.to_string())))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn descriptor() -> ModelDescriptor {
		ModelDescriptor {
			context_order: 12,
			alpha_den: 16,
			inverted_repeat: true,
			edit_threshold: 3,
			edit_alpha_den: 10,
			mode: StorageMode::HashTable.tag(),
			slot_count: 1 << 24,
			max_count: 255,
			multiplier: 4,
			payload_size: 0,
		}
	}

	#[test]
	fn records_have_constant_size() {
		let header = FormatHeader::current(u32::MAX, u32::MAX, u32::MAX, u64::MAX);
		assert_eq!(postcard::to_stdvec(&header).unwrap().len(), HEADER_LEN);
		let small = FormatHeader::current(0, 1, 0, 0);
		assert_eq!(postcard::to_stdvec(&small).unwrap().len(), HEADER_LEN);
		assert_eq!(postcard::to_stdvec(&descriptor()).unwrap().len(), DESCRIPTOR_LEN);
	}

	#[test]
	fn magic_spells_modl() {
		let mut bytes = Vec::new();
		FormatHeader::current(0, 8, 2, 0).write_to(&mut bytes).unwrap();
		assert_eq!(&bytes[..4], b"MODL");
	}

	#[test]
	fn descriptor_reads_back() {
		let mut bytes = Vec::new();
		descriptor().write_to(&mut bytes).unwrap();
		let read = ModelDescriptor::read_from(&mut bytes.as_slice()).unwrap().unwrap();
		assert_eq!(read, descriptor());
	}

	#[test]
	fn short_header_is_io_error() {
		let bytes = [0u8; HEADER_LEN - 1];
		let err = FormatHeader::read_from(&mut bytes.as_slice()).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
	}

	#[test]
	fn validation_order() {
		let mut header = FormatHeader::current(1, 8, 2, 0);
		header.version = 9;
		header.alphabet_size = 20;
		assert_eq!(header.validate(), Err(FormatError::UnsupportedVersion { found: 9 }));
		header.magic = 1;
		assert_eq!(header.validate(), Err(FormatError::BadMagic { found: 1 }));
	}

	#[test]
	fn shape_sizes() {
		let hash = PayloadShape::Hash { width: 8, bound: 3 };
		assert_eq!(hash.byte_len(), Some(8 + 8 * 3 * HASH_ENTRY_LEN as u64));
		let array = PayloadShape::Array { slots: 16 };
		assert_eq!(array.element_count(), Some(64));
		assert_eq!(array.byte_len(), Some(128));
		assert_eq!(PayloadShape::Array { slots: u64::MAX }.byte_len(), None);
	}

	#[test]
	fn unknown_tag_is_rejected() {
		assert_eq!(StorageMode::from_tag(7), Err(FormatError::UnknownMode(7)));
		assert_eq!(StorageMode::from_tag(StorageMode::Array.tag()), Ok(StorageMode::Array));
	}
}
