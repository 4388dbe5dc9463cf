//! Exercises the embedding HTTP client against a real server. Requires an
//! Ollama-compatible `/api/embed` endpoint reachable at the configured URL.
//!
//! Run with: cargo test --features live-tests --test embedding_live

#![cfg(feature = "live-tests")]

use context_vault::{EmbeddingClient, EmbeddingSettings};

#[tokio::test]
async fn embed_batch_returns_one_vector_per_input() {
    let settings = EmbeddingSettings::default();
    let client = EmbeddingClient::new(&settings);
    let inputs = vec![
        "hybrid search fuses FTS5 and vector similarity".to_string(),
        "context vault persists entries as markdown".to_string(),
    ];

    let vectors = client.embed_batch(&inputs).await.expect("embedding request");
    assert_eq!(vectors.len(), inputs.len());
    assert!(vectors.iter().all(|v| v.len() == context_vault::storage::EMBEDDING_DIM));
}

#[tokio::test]
async fn embed_batch_of_nothing_skips_the_request() {
    let settings = EmbeddingSettings::default();
    let client = EmbeddingClient::new(&settings);
    let vectors = client.embed_batch(&[]).await.expect("empty batch");
    assert!(vectors.is_empty());
}
