use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use chrono::DateTime;

use crate::error::{FormatError, Result, Stage, StoreError};
use crate::format::{FormatHeader, ModelDescriptor, PayloadShape, StorageMode};

/// Summary of one model, built from its descriptor only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSummary {
	pub descriptor: ModelDescriptor,
	pub mode: StorageMode,
	/// Bytes skipped for the payload.
	pub payload_bytes: u64,
}

/// Read-only description of a model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFileInfo {
	pub header: FormatHeader,
	pub models: Vec<ModelSummary>,
}

/// Opens `path` read-only and describes it, see [`inspect_reader`].
pub fn inspect_file<P: AsRef<Path>>(path: P) -> Result<ModelFileInfo> {
	let file = File::open(path).map_err(|e| StoreError::io(Stage::Open, e))?;
	inspect_reader(&mut BufReader::new(file))
}

/// Reads the header and every descriptor, skipping payloads by their encoded
/// size without materialising them.
///
/// On success the reader is positioned right after the last payload.
pub fn inspect_reader<R: Read>(reader: &mut R) -> Result<ModelFileInfo> {
	let header = FormatHeader::read_from(reader)
		.map_err(|e| StoreError::io(Stage::Header, e))?
		.map_err(|e| StoreError::format(Stage::Header, e))?;
	header
		.validate()
		.map_err(|e| StoreError::format(Stage::Header, e))?;

	let mut models = Vec::new();
	for index in 0..header.model_count as usize {
		let summary = describe_model(reader, &header).map_err(|e| e.at_model(index))?;
		models.push(summary);
	}
	Ok(ModelFileInfo { header, models })
}

fn describe_model<R: Read>(reader: &mut R, header: &FormatHeader) -> Result<ModelSummary> {
	let descriptor = ModelDescriptor::read_from(reader)
		.map_err(|e| StoreError::io(Stage::Descriptor, e))?
		.map_err(|e| StoreError::format(Stage::Descriptor, e))?;
	let mode = StorageMode::from_tag(descriptor.mode).map_err(|e| StoreError::format(Stage::Mode, e))?;

	let payload_bytes = PayloadShape::new(mode, descriptor.slot_count, header.hash_width, header.collision_bound)
		.byte_len()
		.ok_or_else(|| StoreError::format(Stage::Payload, FormatError::PayloadTooLarge))?;
	let skipped = io::copy(&mut reader.by_ref().take(payload_bytes), &mut io::sink())
		.map_err(|e| StoreError::io(Stage::Payload, e))?;
	if skipped != payload_bytes {
		return Err(StoreError::io(Stage::Payload, io::Error::from(io::ErrorKind::UnexpectedEof)));
	}

	Ok(ModelSummary { descriptor, mode, payload_bytes })
}

/// `YYYY-MM-DD HH:MM:SS` in UTC for a Unix timestamp, `invalid` when out of range.
fn format_utc(secs: u64) -> String {
	i64::try_from(secs)
		.ok()
		.and_then(|secs| DateTime::from_timestamp(secs, 0))
		.map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
		.unwrap_or_else(|| "invalid".to_owned())
}

impl fmt::Display for ModelFileInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let h = &self.header;
		writeln!(f, "==[ MODEL FILE ]=====================")?;
		writeln!(f, "Format version ............. {}", h.version)?;
		writeln!(f, "Models ..................... {}", h.model_count)?;
		writeln!(f, "Alphabet size .............. {}", h.alphabet_size)?;
		writeln!(f, "Hash width ................. {}", h.hash_width)?;
		writeln!(f, "Max hash collisions ........ {}", h.collision_bound)?;
		writeln!(f, "Created on ................. {} UTC", format_utc(h.timestamp))?;
		for (index, model) in self.models.iter().enumerate() {
			let d = &model.descriptor;
			writeln!(f)?;
			writeln!(f, "[Model {}]", index)?;
			writeln!(f, "  Context order ............ {}", d.context_order)?;
			writeln!(f, "  Alpha denominator ........ 1/{}", d.alpha_den)?;
			writeln!(f, "  Inverted repeats ......... {}", if d.inverted_repeat { "yes" } else { "no" })?;
			writeln!(f, "  Storage mode ............. {}", model.mode.name())?;
			writeln!(f, "  Probability slots ........ {}", d.slot_count)?;
			writeln!(f, "  Max count ................ {}", d.max_count)?;
			if d.edit_threshold != 0 {
				writeln!(f, "  Allowed substitutions .... {}", d.edit_threshold)?;
				writeln!(f, "  Substitution alpha ....... 1/{}", d.edit_alpha_den)?;
			}
			writeln!(f, "  Payload bytes ............ {}", model.payload_bytes)?;
		}
		Ok(())
	}
}
