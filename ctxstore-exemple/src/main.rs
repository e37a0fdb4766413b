use std::num::NonZeroU32;

use ctxstore_core::{
    ContextModel, EditParams, ModelParams, ModelStore, Payload, StoreConfig, inspect_file,
};
use rand::Rng;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Every hash-mode model written or read by this store has 4096 buckets
    let config = StoreConfig::default().with_hash_width(4096)?;
    let store = ModelStore::new(config);

    // Each bucket keeps at most 4 contexts; the bound is stored once in the file
    let collision_bound = 4;

    // A random DNA sequence (0..4 = A, C, G, T) to train on
    let mut rng = rand::rng();
    let sequence: Vec<usize> = (0..100_000).map(|_| rng.random_range(0..4)).collect();

    // Order-6 model stored as a dense array: 4^6 slots of 4 counters
    let order = 6;
    let mut dense = ContextModel::dense(ModelParams {
        context_order: order,
        alpha_den: 1,
        inverted_repeat: false,
        edits: None,
        slot_count: 4u64.pow(order),
        max_count: 1 << 15,
        multiplier: 1,
    })?;

    // Order-16 model stored in a hash table, tolerating 3 substitutions
    let mut sparse = ContextModel::hashed(
        ModelParams {
            context_order: 16,
            alpha_den: 20,
            inverted_repeat: true,
            edits: NonZeroU32::new(3).map(|threshold| EditParams { threshold, alpha_den: 10 }),
            slot_count: 1,
            max_count: 15,
            multiplier: 1,
        },
        4096,
        collision_bound,
    )?;

    // Count every (context, next symbol) pair
    let mut dense_ctx = 0usize;
    let mut sparse_ctx = 0u64;
    let mut dropped = 0;
    for (i, &symbol) in sequence.iter().enumerate() {
        if i >= 6 {
            if let Payload::Array(array) = dense.payload_mut() {
                array.update(dense_ctx, symbol, 1 << 15);
            }
        }
        if i >= 16 {
            if let Payload::Hash(table) = sparse.payload_mut() {
                let bucket = table.bucket_of(sparse_ctx.wrapping_mul(0x9E37_79B9_7F4A_7C15));
                if !table.update(bucket, sparse_ctx as u32, symbol, 15) {
                    dropped += 1;
                }
            }
        }
        dense_ctx = ((dense_ctx << 2) | symbol) & (4usize.pow(6) - 1);
        sparse_ctx = ((sparse_ctx << 2) | symbol as u64) & ((1 << 32) - 1);
    }
    println!("Trained 2 models ({} hash updates dropped, chains full)", dropped);

    // Save both models, then read the file back
    let path = std::env::temp_dir().join("ctxstore-exemple.bin");
    store.save(&path, &[dense, sparse], collision_bound)?;
    let loaded = store.load(&path)?;
    println!("Reloaded {} models from {}", loaded.len(), path.display());

    for (i, model) in loaded.models().iter().enumerate() {
        println!(
            "Model {}: {} mode, order {}, {:?}",
            i,
            model.mode().name(),
            model.params().context_order,
            model.provenance()
        );
    }

    // Describe the file without loading the payloads
    println!("{}", inspect_file(&path)?);

    Ok(())
}
