use std::io;

use thiserror::Error;

/// Result type used by every store operation.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Step of a save, load or inspect walk at which a failure happened.
///
/// The same stages are used in both directions: for a save `Header` means
/// "writing the header", for a load it means "reading or validating it".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	/// Opening or creating the model file.
	Open,
	/// File header (read, write or validation).
	Header,
	/// Per-model descriptor.
	Descriptor,
	/// Storage mode dispatch (unrecognised tag).
	Mode,
	/// Model payload (hash table or counter array).
	Payload,
}

impl Stage {
	/// Human-readable stage name used in error messages.
	pub fn name(self) -> &'static str {
		match self {
			Self::Open => "open",
			Self::Header => "header",
			Self::Descriptor => "descriptor",
			Self::Mode => "unknown mode",
			Self::Payload => "payload",
		}
	}
}

/// Structural problems with a model file or with the models handed to a save.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
	#[error("bad magic 0x{found:08X}")]
	BadMagic { found: u32 },
	#[error("unsupported version {found}")]
	UnsupportedVersion { found: u32 },
	#[error("incompatible alphabet: {found} (expected {expected})")]
	IncompatibleAlphabet { found: u32, expected: u32 },
	#[error("incompatible hash width: {found} (expected {expected})")]
	IncompatibleHashWidth { found: u32, expected: u32 },
	#[error("unknown storage mode {0}")]
	UnknownMode(u8),
	/// A hash table whose bucket count or chain length disagrees with the file.
	#[error("hash table is {buckets}x{chain}, file expects {width}x{bound}")]
	TableShape { buckets: usize, chain: usize, width: u32, bound: u32 },
	/// A counter array whose length is not four counters per slot.
	#[error("array holds {counters} counters for {slots} slots")]
	ArrayShape { counters: usize, slots: u64 },
	/// Payload size does not fit in memory addressing.
	#[error("payload size overflows")]
	PayloadTooLarge,
	#[error("{0} models do not fit in the header")]
	TooManyModels(usize),
	/// Record bytes that do not decode (e.g. a boolean that is neither 0 nor 1).
	#[error("malformed record: {0}")]
	Encoding(String),
}

/// What went wrong, independently of where.
#[derive(Debug, Error)]
pub enum ErrorKind {
	#[error("i/o error: {0}")]
	Io(#[from] io::Error),
	#[error(transparent)]
	Format(#[from] FormatError),
	/// A payload buffer could not be allocated.
	#[error("cannot allocate {requested} elements")]
	Resource { requested: usize },
}

fn stage_name(stage: &Stage) -> &'static str {
	stage.name()
}

fn model_suffix(model: &Option<usize>) -> String {
	model.map(|index| format!(" for model {index}")).unwrap_or_default()
}

/// Error returned by `ModelStore` and the inspector.
///
/// Carries the failing stage, the zero-based index of the offending model when
/// the failure is model-specific, and for loads the number of fully built
/// models that were discarded before returning.
#[derive(Debug, Error)]
#[error("{} stage failed{}: {kind}", stage_name(.stage), model_suffix(.model))]
pub struct StoreError {
	stage: Stage,
	model: Option<usize>,
	discarded: usize,
	#[source]
	kind: ErrorKind,
}

impl StoreError {
	pub(crate) fn new(stage: Stage, kind: ErrorKind) -> Self {
		Self { stage, model: None, discarded: 0, kind }
	}

	pub(crate) fn io(stage: Stage, err: io::Error) -> Self {
		Self::new(stage, err.into())
	}

	pub(crate) fn format(stage: Stage, err: FormatError) -> Self {
		Self::new(stage, err.into())
	}

	pub(crate) fn resource(stage: Stage, requested: usize) -> Self {
		Self::new(stage, ErrorKind::Resource { requested })
	}

	pub(crate) fn at_model(mut self, index: usize) -> Self {
		self.model = Some(index);
		self
	}

	pub(crate) fn with_discarded(mut self, discarded: usize) -> Self {
		self.discarded = discarded;
		self
	}

	/// Stage of the walk that failed.
	pub fn stage(&self) -> Stage {
		self.stage
	}

	/// Zero-based index of the model being processed, if any.
	pub fn model_index(&self) -> Option<usize> {
		self.model
	}

	/// Number of fully loaded models released because of this failure.
	pub fn discarded(&self) -> usize {
		self.discarded
	}

	/// Underlying cause, without stage information.
	pub fn kind(&self) -> &ErrorKind {
		&self.kind
	}

	/// Whether the failure is a short read/write or an open failure.
	pub fn is_io(&self) -> bool {
		matches!(self.kind, ErrorKind::Io(_))
	}

	/// Whether a payload or runtime buffer could not be allocated.
	pub fn is_resource(&self) -> bool {
		matches!(self.kind, ErrorKind::Resource { .. })
	}

	/// The format error, if this is one.
	pub fn format_error(&self) -> Option<&FormatError> {
		match &self.kind {
			ErrorKind::Format(err) => Some(err),
			_ => None,
		}
	}
}
