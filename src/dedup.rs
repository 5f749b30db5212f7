// src/dedup.rs
//! Duplicate suppression: URL lookup against stored news, and a 64-bit
//! simhash of the extracted text used as the content identity.

use std::collections::HashSet;

use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::store::KeywordSession;

const SHINGLE: usize = 4;

/// Candidate URLs that are neither repeated in `urls` nor already stored.
/// Order is preserved.
pub async fn filter_new_urls(
    session: &mut KeywordSession,
    urls: &[String],
) -> Result<Vec<String>, sqlx::Error> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(urls.len());
    for url in urls {
        if !seen.insert(url.as_str()) {
            continue;
        }
        if session.news_exists(url).await? {
            debug!(target: "fetch", url = %url, "already ingested");
            counter!("pipeline_duplicates_skipped_total").increment(1);
            continue;
        }
        out.push(url.clone());
    }
    Ok(out)
}

/// Locality-sensitive fingerprint of `text`, rendered as a decimal u64.
/// Case, punctuation and whitespace differences do not change it.
pub fn fingerprint(text: &str) -> String {
    simhash(text).to_string()
}

pub fn simhash(text: &str) -> u64 {
    let cleaned: Vec<char> = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();

    let mut weights = [0i64; 64];
    let mut add = |feature: &[char]| {
        let s: String = feature.iter().collect();
        let h = feature_hash(&s);
        for (bit, w) in weights.iter_mut().enumerate() {
            if (h >> bit) & 1 == 1 {
                *w += 1;
            } else {
                *w -= 1;
            }
        }
    };

    if cleaned.len() < SHINGLE {
        if !cleaned.is_empty() {
            add(cleaned.as_slice());
        }
    } else {
        for window in cleaned.windows(SHINGLE) {
            add(window);
        }
    }

    weights
        .iter()
        .enumerate()
        .fold(0u64, |acc, (bit, w)| if *w > 0 { acc | (1 << bit) } else { acc })
}

fn feature_hash(s: &str) -> u64 {
    let digest = Sha256::digest(s.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::temp_store;

    fn hamming_distance(a: u64, b: u64) -> u32 {
        (a ^ b).count_ones()
    }

    #[test]
    fn identical_text_same_fingerprint() {
        let a = "Lithium prices fell 12% this week as EV demand cooled in Asia.";
        assert_eq!(fingerprint(a), fingerprint(a));
    }

    #[test]
    fn formatting_noise_is_ignored() {
        let a = "Lithium prices fell 12% this week as EV demand cooled.";
        let b = "  LITHIUM prices fell 12 % this week,\n as EV demand cooled!!";
        assert_eq!(fingerprint(a), fingerprint(b));
    }

    #[test]
    fn near_duplicates_are_close_distinct_texts_far() {
        let base = "VinFast opened a new assembly plant in Ha Tinh province, adding capacity \
                    for fifty thousand electric vehicles a year and hiring three thousand workers.";
        let edited = "VinFast opened a new assembly plant in Ha Tinh province, adding capacity \
                      for fifty thousand electric vehicles a year and hiring three thousand staff.";
        let other = "Central bank kept the policy rate unchanged at four point five percent, \
                     citing sticky services inflation and a resilient labour market overall.";
        let d_near = hamming_distance(simhash(base), simhash(edited));
        let d_far = hamming_distance(simhash(base), simhash(other));
        assert!(d_near < d_far, "near={d_near} far={d_far}");
    }

    #[tokio::test]
    async fn filters_repeats_and_known_urls() {
        let (store, _dir) = temp_store().await;
        sqlx::query(
            "INSERT INTO news (title, url, content_hash, published_at, created_at) \
             VALUES ('t', 'https://a.vn/1', 'h1', '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let mut s = store.session().await.unwrap();
        let urls = vec![
            "https://a.vn/1".to_string(),
            "https://b.com/2".to_string(),
            "https://b.com/2".to_string(),
            "https://c.vn/3".to_string(),
        ];
        let out = filter_new_urls(&mut s, &urls).await.unwrap();
        assert_eq!(out, vec!["https://b.com/2".to_string(), "https://c.vn/3".to_string()]);
    }
}
