//! In-memory context models.
//!
//! A [`ContextModel`] couples the scalar parameters persisted in a descriptor
//! with one of two payload shapes and with runtime-only state that is rebuilt
//! whenever a model is created, whether by training or by loading.

use std::num::NonZeroU32;

use thiserror::Error;

use crate::format::{
	ALPHABET_SIZE, ArrayCounter, HashCounters, HashKey, IndexSlot, PayloadShape, StorageMode,
};

/// Capacity of the substitution ring buffer, in symbols.
pub const RING_CAPACITY: usize = 65_535;
/// Guard cells kept in front of the ring so the last symbols stay contiguous.
pub const RING_GUARD: usize = 32;

const ALPHABET: usize = ALPHABET_SIZE as usize;

/// Failure to reserve memory for a model buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot allocate {requested} elements")]
pub struct AllocError {
	/// Number of elements that were requested.
	pub requested: usize,
}

/// Allocates `len` default elements without aborting on failure.
pub(crate) fn try_filled<T: Clone + Default>(len: usize) -> Result<Vec<T>, AllocError> {
	let mut buf = Vec::new();
	buf.try_reserve_exact(len).map_err(|_| AllocError { requested: len })?;
	buf.resize(len, T::default());
	Ok(buf)
}

/// Substitution (edit) tolerance of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditParams {
	/// Number of mismatches tolerated before the tracker gives up.
	pub threshold: NonZeroU32,
	/// Alpha denominator used by the substitution-tolerant estimator.
	pub alpha_den: u32,
}

/// Scalar parameters of a model, as persisted in its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelParams {
	pub context_order: u32,
	pub alpha_den: u32,
	pub inverted_repeat: bool,
	/// `None` disables substitution tracking.
	pub edits: Option<EditParams>,
	/// Number of probability slots (distribution instances).
	pub slot_count: u64,
	pub max_count: u32,
	pub multiplier: u64,
}

/// One cell of a hash bucket chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HashEntry {
	pub key: HashKey,
	pub counters: HashCounters,
}

/// Sparse context table: `width` buckets, each a chain of exactly `bound` cells.
///
/// `index[b]` is the number of occupied cells of bucket `b`. Unused cells are
/// zeroed entries, which keeps the table position-addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTable {
	index: Vec<IndexSlot>,
	buckets: Vec<Vec<HashEntry>>,
	bound: u32,
}

impl HashTable {
	/// Creates an empty table.
	pub fn try_new(width: u32, bound: u32) -> Result<Self, AllocError> {
		let width = width as usize;
		let index = try_filled::<IndexSlot>(width)?;
		let mut buckets = Vec::new();
		buckets.try_reserve_exact(width).map_err(|_| AllocError { requested: width })?;
		for _ in 0..width {
			buckets.push(try_filled::<HashEntry>(bound as usize)?);
		}
		Ok(Self { index, buckets, bound })
	}

	pub(crate) fn from_parts(index: Vec<IndexSlot>, buckets: Vec<Vec<HashEntry>>, bound: u32) -> Self {
		Self { index, buckets, bound }
	}

	/// Number of buckets.
	pub fn width(&self) -> usize {
		self.buckets.len()
	}

	/// Chain length of every bucket.
	pub fn bound(&self) -> u32 {
		self.bound
	}

	pub fn index(&self) -> &[IndexSlot] {
		&self.index
	}

	/// All cells of a bucket, occupied or not.
	pub fn bucket(&self, bucket: usize) -> Option<&[HashEntry]> {
		self.buckets.get(bucket).map(Vec::as_slice)
	}

	pub(crate) fn buckets(&self) -> &[Vec<HashEntry>] {
		&self.buckets
	}

	/// Bucket selected by a context hash.
	pub fn bucket_of(&self, hash: u64) -> usize {
		(hash % self.buckets.len().max(1) as u64) as usize
	}

	/// Counters of `key` in `bucket`, if present.
	pub fn get(&self, bucket: usize, key: HashKey) -> Option<&HashCounters> {
		let chain = self.buckets.get(bucket)?;
		let used = usize::from(*self.index.get(bucket)?).min(chain.len());
		chain[..used]
			.iter()
			.find(|entry| entry.key == key)
			.map(|entry| &entry.counters)
	}

	/// Counters of `key` in `bucket`, claiming a free cell if needed.
	///
	/// Returns `None` when the bucket does not exist or its chain is full.
	pub fn entry(&mut self, bucket: usize, key: HashKey) -> Option<&mut HashCounters> {
		let chain = self.buckets.get_mut(bucket)?;
		// Index cells read from a file are not trusted to stay within the chain.
		let used = usize::from(*self.index.get(bucket)?).min(chain.len());
		if let Some(pos) = chain[..used].iter().position(|entry| entry.key == key) {
			return Some(&mut chain[pos].counters);
		}
		if used >= chain.len() || used >= IndexSlot::MAX as usize {
			return None;
		}
		chain[used] = HashEntry { key, counters: HashCounters::default() };
		self.index[bucket] = used as IndexSlot + 1;
		Some(&mut chain[used].counters)
	}

	/// Records one occurrence of `symbol` after context `key`.
	///
	/// Counters saturate at `max_count` (and at the cell width); reaching the
	/// cap halves every counter of the entry. Returns `false` when the chain
	/// is full and the occurrence was dropped.
	pub fn update(&mut self, bucket: usize, key: HashKey, symbol: usize, max_count: u32) -> bool {
		if symbol >= ALPHABET {
			return false;
		}
		let cap = max_count.min(u32::from(u8::MAX)) as u8;
		match self.entry(bucket, key) {
			Some(counters) => {
				bump(counters, symbol, cap);
				true
			}
			None => false,
		}
	}
}

/// Dense counter table: four counters per probability slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterArray {
	counters: Vec<ArrayCounter>,
}

impl CounterArray {
	/// Creates a zeroed array for `slots` slots.
	pub fn try_zeroed(slots: u64) -> Result<Self, AllocError> {
		let len = PayloadShape::Array { slots }
			.element_count_usize()
			.map_err(|_| AllocError { requested: usize::MAX })?;
		Ok(Self { counters: try_filled(len)? })
	}

	pub(crate) fn from_counters(counters: Vec<ArrayCounter>) -> Self {
		Self { counters }
	}

	pub fn counters(&self) -> &[ArrayCounter] {
		&self.counters
	}

	pub fn counters_mut(&mut self) -> &mut [ArrayCounter] {
		&mut self.counters
	}

	/// The four counters of one slot, `None` past the end.
	pub fn slot(&self, slot: usize) -> Option<&[ArrayCounter]> {
		self.counters.get(slot_range(slot)?)
	}

	/// Records one occurrence of `symbol` in `slot`; see [`HashTable::update`].
	pub fn update(&mut self, slot: usize, symbol: usize, max_count: u32) -> bool {
		let cap = max_count.min(u32::from(ArrayCounter::MAX)) as ArrayCounter;
		match slot_range(slot).and_then(|range| self.counters.get_mut(range)) {
			Some(counters) if symbol < ALPHABET => {
				bump(counters, symbol, cap);
				true
			}
			_ => false,
		}
	}
}

fn slot_range(slot: usize) -> Option<std::ops::Range<usize>> {
	let start = slot.checked_mul(ALPHABET)?;
	Some(start..start.checked_add(ALPHABET)?)
}

fn bump<C>(counters: &mut [C], symbol: usize, cap: C)
where
	C: Copy + PartialOrd + std::ops::AddAssign + std::ops::ShrAssign<u8> + From<u8>,
{
	if counters[symbol] >= cap {
		for counter in counters.iter_mut() {
			*counter >>= 1u8;
		}
	}
	if counters[symbol] < cap {
		counters[symbol] += C::from(1u8);
	}
}

/// Storage of a model, one variant per storage mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
	Hash(HashTable),
	Array(CounterArray),
}

impl Payload {
	pub fn mode(&self) -> StorageMode {
		match self {
			Self::Hash(_) => StorageMode::HashTable,
			Self::Array(_) => StorageMode::Array,
		}
	}
}

/// Where a model came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
	/// Built from sequence data in this process.
	Trained,
	/// Reconstructed from a model file.
	Loaded,
}

/// Fixed-capacity symbol history with a guard zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRing {
	buf: Vec<u8>,
	pos: usize,
}

impl SymbolRing {
	fn try_new() -> Result<Self, AllocError> {
		Ok(Self { buf: try_filled(RING_CAPACITY + RING_GUARD)?, pos: RING_GUARD })
	}

	/// Appends a symbol, wrapping after `RING_CAPACITY` symbols.
	pub fn push(&mut self, symbol: u8) {
		self.buf[self.pos] = symbol;
		self.pos += 1;
		if self.pos == self.buf.len() {
			let tail = self.buf.len() - RING_GUARD;
			self.buf.copy_within(tail.., 0);
			self.pos = RING_GUARD;
		}
	}

	/// The last `n` symbols (at most `RING_GUARD`), oldest first.
	pub fn last(&self, n: usize) -> &[u8] {
		let n = n.min(RING_GUARD);
		&self.buf[self.pos - n..self.pos]
	}
}

/// Bookkeeping for substitution-tolerant context matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionTracker {
	pub threshold: u32,
	pub alpha_den: u32,
	pub history: SymbolRing,
	/// One cell per recent position: 1 for a mismatch, 0 for a hit.
	pub mask: Vec<u8>,
	/// Mismatches currently inside the mask window.
	pub misses: u32,
	pub mask_pos: usize,
	#[cfg(test)]
	_live: live::Token,
}

impl SubstitutionTracker {
	pub(crate) fn try_new(edits: EditParams) -> Result<Self, AllocError> {
		Ok(Self {
			threshold: edits.threshold.get(),
			alpha_den: edits.alpha_den,
			history: SymbolRing::try_new()?,
			mask: try_filled(RING_GUARD)?,
			misses: 0,
			mask_pos: 0,
			#[cfg(test)]
			_live: live::Token::new(),
		})
	}

	/// Records whether the predicted symbol matched; returns `false` once the
	/// mismatches in the window exceed the threshold.
	pub fn record(&mut self, symbol: u8, hit: bool) -> bool {
		self.history.push(symbol);
		let old = std::mem::replace(&mut self.mask[self.mask_pos], u8::from(!hit));
		self.misses = self.misses - u32::from(old) + u32::from(!hit);
		self.mask_pos = (self.mask_pos + 1) % self.mask.len();
		self.misses <= self.threshold
	}
}

/// State that is never persisted and is recomputed on creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeState {
	pub forward_cursor: u64,
	pub reverse_cursor: u64,
	pub provenance: Provenance,
	pub substitution: Option<SubstitutionTracker>,
}

impl RuntimeState {
	/// Fresh runtime fields: forward cursor at the first slot, reverse cursor
	/// at the last one, tracker allocated when edits are enabled.
	pub(crate) fn rehydrate(params: &ModelParams, provenance: Provenance) -> Result<Self, AllocError> {
		let substitution = params.edits.map(SubstitutionTracker::try_new).transpose()?;
		Ok(Self {
			forward_cursor: 0,
			reverse_cursor: params.slot_count.saturating_sub(1),
			provenance,
			substitution,
		})
	}
}

/// A finite-context model: parameters, payload and runtime state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextModel {
	params: ModelParams,
	payload: Payload,
	runtime: RuntimeState,
	#[cfg(test)]
	_live: live::Token,
}

impl ContextModel {
	pub(crate) fn assemble(params: ModelParams, payload: Payload, runtime: RuntimeState) -> Self {
		Self {
			params,
			payload,
			runtime,
			#[cfg(test)]
			_live: live::Token::new(),
		}
	}

	/// New zeroed hash-mode model.
	pub fn hashed(params: ModelParams, hash_width: u32, collision_bound: u32) -> Result<Self, AllocError> {
		let table = HashTable::try_new(hash_width, collision_bound)?;
		let runtime = RuntimeState::rehydrate(&params, Provenance::Trained)?;
		Ok(Self::assemble(params, Payload::Hash(table), runtime))
	}

	/// New zeroed array-mode model with `params.slot_count` slots.
	pub fn dense(params: ModelParams) -> Result<Self, AllocError> {
		let array = CounterArray::try_zeroed(params.slot_count)?;
		let runtime = RuntimeState::rehydrate(&params, Provenance::Trained)?;
		Ok(Self::assemble(params, Payload::Array(array), runtime))
	}

	pub fn params(&self) -> &ModelParams {
		&self.params
	}

	pub fn payload(&self) -> &Payload {
		&self.payload
	}

	pub fn payload_mut(&mut self) -> &mut Payload {
		&mut self.payload
	}

	pub fn runtime(&self) -> &RuntimeState {
		&self.runtime
	}

	pub fn runtime_mut(&mut self) -> &mut RuntimeState {
		&mut self.runtime
	}

	pub fn mode(&self) -> StorageMode {
		self.payload.mode()
	}

	pub fn provenance(&self) -> Provenance {
		self.runtime.provenance
	}
}
