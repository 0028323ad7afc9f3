//! Job id derivation.

use sha2::{Digest, Sha256};

use super::JobConfig;

/// `{crawlId}-{confId}-{TYPE}-{hash}`, or `{confId}-{TYPE}-{hash}` without a
/// crawl id. The hash covers the config and a caller-supplied sequence
/// number, so repeated submissions of the same config get distinct ids.
pub fn generate_job_id(config: &JobConfig, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(config).unwrap_or_default());
    hasher.update(sequence.to_be_bytes());
    let digest = hasher.finalize();
    let hash = hex::encode(&digest[..4]);
    match config.crawl_id.as_deref().filter(|c| !c.is_empty()) {
        Some(crawl) => format!("{}-{}-{}-{}", crawl, config.conf_id, config.job_type, hash),
        None => format!("{}-{}-{}", config.conf_id, config.job_type, hash),
    }
}
