use crate::format::DEFAULT_HASH_WIDTH;

/// Process-level settings shared by every file a `ModelStore` reads or writes.
///
/// # Invariants
/// - `hash_width` is never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
	hash_width: u32,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self { hash_width: DEFAULT_HASH_WIDTH }
	}
}

impl StoreConfig {
	/// Number of buckets of every hash table written or accepted by the store.
	pub fn hash_width(&self) -> u32 {
		self.hash_width
	}

	/// Sets the hash table width.
	///
	/// # Errors
	/// Returns an error if the width is zero or exceeds the addressable range.
	pub fn with_hash_width(mut self, hash_width: u32) -> Result<Self, String> {
		if hash_width == 0 {
			return Err("Hash width must be greater than 0".to_owned());
		}
		if usize::try_from(hash_width).is_err() {
			return Err(format!("Hash width {} does not fit in memory", hash_width));
		}
		self.hash_width = hash_width;
		Ok(self)
	}
}
