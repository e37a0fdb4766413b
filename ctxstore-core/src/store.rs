use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::num::NonZeroU32;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, warn};

use crate::codec::array::{read_counter_array, write_counter_array};
use crate::codec::hash::{read_hash_table, write_hash_table};
use crate::config::StoreConfig;
use crate::error::{FormatError, Result, Stage, StoreError};
use crate::format::{FormatHeader, ModelDescriptor, StorageMode};
use crate::model::{ContextModel, EditParams, ModelParams, Payload, Provenance, RuntimeState};

/// Models read back from a file, together with the header they came with.
///
/// The caller owns the models from here on; dropping this value (or the
/// vector returned by [`LoadedModels::into_models`]) releases them.
#[derive(Debug)]
pub struct LoadedModels {
	header: FormatHeader,
	models: Vec<ContextModel>,
}

impl LoadedModels {
	/// Header the models were read with.
	pub fn header(&self) -> &FormatHeader {
		&self.header
	}

	/// Chain length shared by every hash-mode model of the file.
	pub fn collision_bound(&self) -> u32 {
		self.header.collision_bound
	}

	/// Loaded models, in file order.
	pub fn models(&self) -> &[ContextModel] {
		&self.models
	}

	/// Number of loaded models.
	pub fn len(&self) -> usize {
		self.models.len()
	}

	/// Whether the file held no model.
	pub fn is_empty(&self) -> bool {
		self.models.is_empty()
	}

	/// Hands the models over to the caller, dropping the header.
	pub fn into_models(self) -> Vec<ContextModel> {
		self.models
	}
}

/// Reads and writes model files.
///
/// # Responsibilities
/// - Write the header then one (descriptor, payload) pair per model
/// - Validate magic, version, alphabet and hash width on load
/// - Rebuild runtime-only state of every loaded model
/// - Release every partially loaded model when a load fails
///
/// Saves are not atomic: a failed save leaves whatever was already flushed.
#[derive(Debug, Clone, Default)]
pub struct ModelStore {
	config: StoreConfig,
}

impl ModelStore {
	/// Store validating files against `config`.
	pub fn new(config: StoreConfig) -> Self {
		Self { config }
	}

	/// Configuration used for saves and load validation.
	pub fn config(&self) -> &StoreConfig {
		&self.config
	}

	/// Saves `models` to `path`, truncating any existing file.
	///
	/// `collision_bound` is stored once in the header and must be the chain
	/// length of every hash-mode model.
	pub fn save<P: AsRef<Path>>(&self, path: P, models: &[ContextModel], collision_bound: u32) -> Result<()> {
		let path = path.as_ref();
		let file = File::create(path).map_err(|e| StoreError::io(Stage::Open, e))?;
		let mut writer = BufWriter::new(file);
		let result = self.save_to(&mut writer, models, collision_bound);
		if let Err(err) = &result {
			error!("Cannot save models to {}: {}", path.display(), err);
		}
		result
	}

	/// Writes a complete model file to `writer` and flushes it.
	pub fn save_to<W: Write>(&self, writer: &mut W, models: &[ContextModel], collision_bound: u32) -> Result<()> {
		let model_count = u32::try_from(models.len())
			.map_err(|_| StoreError::format(Stage::Header, FormatError::TooManyModels(models.len())))?;
		let timestamp = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_secs())
			.unwrap_or(0);
		let width = self.config.hash_width();

		let header = FormatHeader::current(model_count, width, collision_bound, timestamp);
		header
			.write_to(writer)
			.map_err(|e| StoreError::io(Stage::Header, e))?;
		debug!("Header written: {} models, hash {}x{}", model_count, width, collision_bound);

		for (index, model) in models.iter().enumerate() {
			descriptor_of(model)
				.write_to(writer)
				.map_err(|e| StoreError::io(Stage::Descriptor, e).at_model(index))?;

			let written = match model.payload() {
				Payload::Hash(table) => write_hash_table(writer, table, width, collision_bound),
				Payload::Array(array) => write_counter_array(writer, array, model.params().slot_count),
			};
			written.map_err(|e| e.at_model(index))?;
			debug!("Model {} saved ({})", index, model.mode().name());
		}

		let stage = if models.is_empty() { Stage::Header } else { Stage::Payload };
		writer.flush().map_err(|e| StoreError::io(stage, e))
	}

	/// Loads every model of the file at `path`.
	///
	/// # Errors
	/// Returns the stage that failed and, for per-model stages, the index of
	/// the offending model. Every model built before the failure is released.
	pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<LoadedModels> {
		let path = path.as_ref();
		let file = File::open(path).map_err(|e| StoreError::io(Stage::Open, e))?;
		let result = self.load_from(&mut BufReader::new(file));
		if let Err(err) = &result {
			error!("Cannot load models from {}: {}", path.display(), err);
		}
		result
	}

	/// Loads a complete model file from `reader`.
	pub fn load_from<R: Read>(&self, reader: &mut R) -> Result<LoadedModels> {
		let header = FormatHeader::read_from(reader)
			.map_err(|e| StoreError::io(Stage::Header, e))?
			.map_err(|e| StoreError::format(Stage::Header, e))?;
		self.validate(&header)?;
		debug!("Header validated: {} models", header.model_count);

		let count = header.model_count as usize;
		let mut models = Vec::new();
		models
			.try_reserve_exact(count)
			.map_err(|_| StoreError::resource(Stage::Header, count))?;

		for index in 0..count {
			match load_model(reader, &header) {
				Ok(model) => {
					debug!("Model {} loaded ({})", index, model.mode().name());
					models.push(model);
				}
				Err(err) => {
					let discarded = models.len();
					drop(models);
					return Err(err.at_model(index).with_discarded(discarded));
				}
			}
		}

		Ok(LoadedModels { header, models })
	}

	fn validate(&self, header: &FormatHeader) -> Result<()> {
		header
			.validate()
			.map_err(|e| StoreError::format(Stage::Header, e))?;
		let expected = self.config.hash_width();
		if header.hash_width != expected {
			return Err(StoreError::format(
				Stage::Header,
				FormatError::IncompatibleHashWidth { found: header.hash_width, expected },
			));
		}
		Ok(())
	}
}

/// Descriptor persisted for `model`. The payload size is always zero.
pub fn descriptor_of(model: &ContextModel) -> ModelDescriptor {
	let params = model.params();
	ModelDescriptor {
		context_order: params.context_order,
		alpha_den: params.alpha_den,
		inverted_repeat: params.inverted_repeat,
		edit_threshold: params.edits.map_or(0, |edits| edits.threshold.get()),
		edit_alpha_den: params.edits.map_or(0, |edits| edits.alpha_den),
		mode: model.mode().tag(),
		slot_count: params.slot_count,
		max_count: params.max_count,
		multiplier: params.multiplier,
		payload_size: 0,
	}
}

fn params_of(descriptor: &ModelDescriptor) -> ModelParams {
	ModelParams {
		context_order: descriptor.context_order,
		alpha_den: descriptor.alpha_den,
		inverted_repeat: descriptor.inverted_repeat,
		edits: NonZeroU32::new(descriptor.edit_threshold).map(|threshold| EditParams {
			threshold,
			alpha_den: descriptor.edit_alpha_den,
		}),
		slot_count: descriptor.slot_count,
		max_count: descriptor.max_count,
		multiplier: descriptor.multiplier,
	}
}

/// Descriptor -> runtime rehydration -> mode dispatch -> payload.
///
/// Anything built here is dropped on the error path, including the
/// substitution buffers of a model whose payload never arrived.
fn load_model<R: Read>(reader: &mut R, header: &FormatHeader) -> Result<ContextModel> {
	let descriptor = ModelDescriptor::read_from(reader)
		.map_err(|e| StoreError::io(Stage::Descriptor, e))?
		.map_err(|e| StoreError::format(Stage::Descriptor, e))?;
	if descriptor.payload_size != 0 {
		warn!("Ignoring reserved payload size {}", descriptor.payload_size);
	}

	let params = params_of(&descriptor);
	let runtime = RuntimeState::rehydrate(&params, Provenance::Loaded)
		.map_err(|e| StoreError::resource(Stage::Descriptor, e.requested))?;

	let mode = StorageMode::from_tag(descriptor.mode).map_err(|e| StoreError::format(Stage::Mode, e))?;
	let payload = match mode {
		StorageMode::HashTable => Payload::Hash(read_hash_table(reader, header.hash_width, header.collision_bound)?),
		StorageMode::Array => Payload::Array(read_counter_array(reader, params.slot_count)?),
	};

	Ok(ContextModel::assemble(params, payload, runtime))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::format::{HEADER_LEN, MAGIC, VERSION};
	use crate::model::live;

	const WIDTH: u32 = 16;
	const BOUND: u32 = 2;

	fn store() -> ModelStore {
		ModelStore::new(StoreConfig::default().with_hash_width(WIDTH).unwrap())
	}

	fn array_model(order: u32, edits: Option<u32>) -> ContextModel {
		let params = ModelParams {
			context_order: order,
			alpha_den: 16,
			edits: edits.and_then(NonZeroU32::new).map(|threshold| EditParams { threshold, alpha_den: 8 }),
			slot_count: 4u64.pow(order),
			max_count: 1000,
			..ModelParams::default()
		};
		let mut model = ContextModel::dense(params).unwrap();
		if let Payload::Array(array) = model.payload_mut() {
			array.update(1, 2, 1000);
		}
		model
	}

	fn hash_model() -> ContextModel {
		let params = ModelParams { context_order: 14, alpha_den: 1, slot_count: 1, max_count: 15, ..ModelParams::default() };
		let mut model = ContextModel::hashed(params, WIDTH, BOUND).unwrap();
		if let Payload::Hash(table) = model.payload_mut() {
			table.update(3, 0xABCD, 1, 15);
		}
		model
	}

	fn saved(models: &[ContextModel]) -> Vec<u8> {
		let mut bytes = Vec::new();
		store().save_to(&mut bytes, models, BOUND).unwrap();
		bytes
	}

	/// Saves `models`, then appends one descriptor with an unknown mode tag.
	fn with_unknown_mode(models: &[ContextModel]) -> Vec<u8> {
		let mut bytes = saved(models);
		let count = models.len() as u32 + 1;
		bytes[8..12].copy_from_slice(&count.to_le_bytes());
		let mut bad = descriptor_of(&models[0]);
		bad.edit_threshold = 2;
		bad.edit_alpha_den = 5;
		bad.mode = 7;
		bad.write_to(&mut bytes).unwrap();
		bytes
	}

	#[test]
	fn round_trip_rebuilds_runtime_state() {
		let models = vec![array_model(2, Some(3)), hash_model(), array_model(1, None)];
		let loaded = store().load_from(&mut saved(&models).as_slice()).unwrap();

		assert_eq!(loaded.len(), 3);
		assert_eq!(loaded.collision_bound(), BOUND);
		for (original, read) in models.iter().zip(loaded.models()) {
			assert_eq!(read.params(), original.params());
			assert_eq!(read.payload(), original.payload());
			assert_eq!(read.provenance(), Provenance::Loaded);
			assert_eq!(read.runtime().forward_cursor, 0);
			assert_eq!(read.runtime().reverse_cursor, original.params().slot_count - 1);
		}
		let tracker = loaded.models()[0].runtime().substitution.as_ref().unwrap();
		assert_eq!((tracker.threshold, tracker.alpha_den), (3, 8));
		assert!(loaded.models()[1].runtime().substitution.is_none());
	}

	#[test]
	fn edit_alpha_is_zero_without_threshold() {
		let descriptor = descriptor_of(&array_model(1, None));
		assert_eq!((descriptor.edit_threshold, descriptor.edit_alpha_den), (0, 0));
		assert_eq!(descriptor.payload_size, 0);
	}

	#[test]
	fn unknown_mode_releases_every_model() {
		let models = vec![array_model(2, Some(1)), hash_model(), array_model(1, None)];
		let bytes = with_unknown_mode(&models);
		let before = live::count();

		let err = store().load_from(&mut bytes.as_slice()).unwrap_err();

		assert_eq!(err.stage(), Stage::Mode);
		assert_eq!(err.model_index(), Some(3));
		assert_eq!(err.discarded(), 3);
		assert_eq!(err.format_error(), Some(&FormatError::UnknownMode(7)));
		assert_eq!(live::count(), before);
	}

	#[test]
	fn truncated_payload_reports_model_and_releases() {
		let models = vec![array_model(1, Some(2)), array_model(2, Some(2))];
		let mut bytes = saved(&models);
		bytes.truncate(bytes.len() - 1);
		let before = live::count();

		let err = store().load_from(&mut bytes.as_slice()).unwrap_err();

		assert_eq!((err.stage(), err.model_index(), err.discarded()), (Stage::Payload, Some(1), 1));
		assert!(err.is_io());
		assert_eq!(live::count(), before);
	}

	#[test]
	fn unallocatable_payload_is_resource_error() {
		let mut bytes = Vec::new();
		FormatHeader::current(1, WIDTH, BOUND, 0).write_to(&mut bytes).unwrap();
		let mut huge = descriptor_of(&array_model(1, None));
		huge.slot_count = 1 << 61;
		huge.write_to(&mut bytes).unwrap();
		let before = live::count();

		let err = store().load_from(&mut bytes.as_slice()).unwrap_err();

		assert_eq!(err.stage(), Stage::Payload);
		assert!(err.is_resource());
		assert_eq!(err.model_index(), Some(0));
		assert_eq!(err.discarded(), 0);
		assert_eq!(live::count(), before);
	}

	#[test]
	fn missing_descriptor_is_descriptor_stage() {
		let mut bytes = saved(&[hash_model()]);
		bytes[8..12].copy_from_slice(&2u32.to_le_bytes());
		let err = store().load_from(&mut bytes.as_slice()).unwrap_err();
		assert_eq!((err.stage(), err.model_index(), err.discarded()), (Stage::Descriptor, Some(1), 1));
	}

	#[test]
	fn bad_magic_is_rejected_before_models() {
		let mut bytes = saved(&[array_model(1, Some(4))]);
		bytes[0] ^= 0xFF;
		let before = live::count();

		let err = store().load_from(&mut bytes.as_slice()).unwrap_err();

		assert_eq!(err.stage(), Stage::Header);
		assert_eq!(err.model_index(), None);
		assert!(matches!(err.format_error(), Some(FormatError::BadMagic { .. })));
		assert_eq!(live::count(), before);
	}

	#[test]
	fn bad_version_is_rejected_before_descriptors() {
		// A header alone: any attempt to parse a descriptor would be an i/o error.
		let mut header = FormatHeader::current(5, WIDTH, BOUND, 0);
		header.version = VERSION + 1;
		let mut bytes = Vec::new();
		header.write_to(&mut bytes).unwrap();
		assert_eq!(bytes.len(), HEADER_LEN);

		let err = store().load_from(&mut bytes.as_slice()).unwrap_err();
		assert_eq!(err.format_error(), Some(&FormatError::UnsupportedVersion { found: VERSION + 1 }));
	}

	#[test]
	fn alphabet_and_width_must_match() {
		let mut header = FormatHeader::current(0, WIDTH, BOUND, 0);
		header.alphabet_size = 5;
		let mut bytes = Vec::new();
		header.write_to(&mut bytes).unwrap();
		let err = store().load_from(&mut bytes.as_slice()).unwrap_err();
		assert_eq!(err.format_error(), Some(&FormatError::IncompatibleAlphabet { found: 5, expected: 4 }));

		let other = ModelStore::new(StoreConfig::default().with_hash_width(WIDTH * 2).unwrap());
		let err = other.load_from(&mut saved(&[]).as_slice()).unwrap_err();
		assert!(matches!(err.format_error(), Some(FormatError::IncompatibleHashWidth { .. })));
	}

	#[test]
	fn reserved_payload_size_is_ignored() {
		let model = array_model(1, None);
		let mut bytes = saved(std::slice::from_ref(&model));
		let field = HEADER_LEN + 38;
		bytes[field..field + 8].copy_from_slice(&12345u64.to_le_bytes());

		let loaded = store().load_from(&mut bytes.as_slice()).unwrap();
		assert_eq!(loaded.models()[0].payload(), model.payload());
	}

	#[test]
	fn header_records_count_and_bound() {
		let bytes = saved(&[hash_model(), hash_model()]);
		let header = FormatHeader::read_from(&mut bytes.as_slice()).unwrap().unwrap();
		assert_eq!(header.magic, MAGIC);
		assert_eq!(header.model_count, 2);
		assert_eq!(header.collision_bound, BOUND);
		assert_eq!(header.hash_width, WIDTH);
	}

	#[test]
	fn save_rejects_table_from_other_width() {
		let params = ModelParams { slot_count: 1, ..ModelParams::default() };
		let model = ContextModel::hashed(params, WIDTH + 1, BOUND).unwrap();
		let err = store().save_to(&mut Vec::new(), &[model], BOUND).unwrap_err();
		assert_eq!(err.stage(), Stage::Payload);
		assert_eq!(err.model_index(), Some(0));
	}
}
