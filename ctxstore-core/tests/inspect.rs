//! Inspector walks files read-only and consumes them exactly.

use std::io::{Cursor, Read};

use ctxstore_core::{
	ContextModel, ModelParams, ModelStore, Payload, StorageMode, StoreConfig, inspect_file, inspect_reader,
};
use tempfile::TempDir;

const WIDTH: u32 = 8;
const BOUND: u32 = 3;

fn store() -> ModelStore {
	ModelStore::new(StoreConfig::default().with_hash_width(WIDTH).unwrap())
}

fn array_model(order: u32) -> ContextModel {
	let params = ModelParams { context_order: order, alpha_den: 1, slot_count: 4u64.pow(order), max_count: 9, ..ModelParams::default() };
	let mut model = ContextModel::dense(params).unwrap();
	if let Payload::Array(array) = model.payload_mut() {
		array.update(0, 3, 9);
	}
	model
}

fn hash_model() -> ContextModel {
	let params = ModelParams { context_order: 11, alpha_den: 2, slot_count: 1, max_count: 9, ..ModelParams::default() };
	ContextModel::hashed(params, WIDTH, BOUND).unwrap()
}

fn file_bytes(models: &[ContextModel]) -> Vec<u8> {
	let mut bytes = Vec::new();
	store().save_to(&mut bytes, models, BOUND).unwrap();
	bytes
}

fn assert_consumes_exactly(models: &[ContextModel]) {
	let bytes = file_bytes(models);
	let mut cursor = Cursor::new(bytes.as_slice());

	let info = inspect_reader(&mut cursor).unwrap();

	assert_eq!(cursor.position(), bytes.len() as u64);
	assert_eq!(info.header.model_count as usize, models.len());
	let modes: Vec<StorageMode> = info.models.iter().map(|m| m.mode).collect();
	let expected: Vec<StorageMode> = models.iter().map(ContextModel::mode).collect();
	assert_eq!(modes, expected);
}

#[test]
fn array_only_file_is_consumed_to_eof() {
	assert_consumes_exactly(&[array_model(1), array_model(3)]);
}

#[test]
fn hash_only_file_is_consumed_to_eof() {
	assert_consumes_exactly(&[hash_model(), hash_model()]);
}

#[test]
fn mixed_file_is_consumed_to_eof() {
	assert_consumes_exactly(&[hash_model(), array_model(2), hash_model(), array_model(0)]);
}

#[test]
fn inspect_file_leaves_bytes_untouched() {
	let dir = TempDir::new().unwrap();
	let path = dir.path().join("models.bin");
	store().save(&path, &[array_model(2), hash_model()], BOUND).unwrap();
	let before = std::fs::read(&path).unwrap();

	let info = inspect_file(&path).unwrap();

	assert_eq!(std::fs::read(&path).unwrap(), before);
	assert_eq!(info.models[0].descriptor.slot_count, 16);
	assert_eq!(info.models[1].mode, StorageMode::HashTable);
	let report = info.to_string();
	assert!(report.contains("hash table"));
	assert!(report.contains("Max hash collisions ........ 3"));
}

#[test]
fn trailing_bytes_are_left_unread() {
	let mut bytes = file_bytes(&[array_model(1)]);
	let end = bytes.len();
	bytes.extend_from_slice(b"tail");
	let mut cursor = Cursor::new(bytes.as_slice());

	inspect_reader(&mut cursor).unwrap();

	assert_eq!(cursor.position(), end as u64);
	let mut rest = Vec::new();
	cursor.read_to_end(&mut rest).unwrap();
	assert_eq!(rest, b"tail");
}

#[test]
fn bad_magic_is_rejected() {
	let mut bytes = file_bytes(&[array_model(1)]);
	bytes[3] = b'X';
	assert!(inspect_reader(&mut bytes.as_slice()).is_err());
}
