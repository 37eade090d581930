//! Scam-token detection (spec §9 Open Questions).
//!
//! spec.md keeps this interface intentionally narrow and defers the exact
//! signal weights to a configuration file rather than specifying them:
//! "the source code's scam-token detection rule set is partially
//! data-driven; the exact signal weights are not specified here." This
//! module keeps the interface — `ScamDetectionService::detect_scams` — and
//! supplies one weighted, config-driven implementation rather than inventing
//! the withheld weights as fact.

use std::collections::HashMap;

use crate::model::{AssetMovement, Note, NoteSeverity};

/// Per-asset metadata consulted by detection signals. Sourced from the
/// persisted `token_metadata` table (spec §6); unknown assets are treated as
/// unverified with no flags rather than erroring.
#[derive(Debug, Clone, Default)]
pub struct TokenMetadata {
    pub symbol: String,
    pub verified: bool,
    /// Free-form signal tags attached by whatever upstream scanner populated
    /// `token_metadata` (e.g. "honeypot", "unlimited_mint", "name_squat").
    pub flags: Vec<String>,
}

/// `(signal tag, weight)` pairs, data-driven per spec §9 rather than a fixed
/// constant table baked into the binary.
#[derive(Debug, Clone)]
pub struct ScamSignalWeights {
    pub weights: HashMap<String, f64>,
    pub unverified_weight: f64,
    pub threshold: f64,
}

impl Default for ScamSignalWeights {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
            unverified_weight: 0.0,
            threshold: 1.0,
        }
    }
}

/// The narrow seam spec §9 asks to be preserved: given a transaction's
/// movements and the per-asset metadata map, annotate movements worth
/// flagging. Keyed by transaction index within whatever batch the caller is
/// scanning, mirroring `detectScams(movements, metadataMap, chain) ->
/// Map<txIndex, Note>`.
pub trait ScamDetectionService {
    fn detect_scams(
        &self,
        movements: &[Vec<AssetMovement>],
        metadata: &HashMap<String, TokenMetadata>,
        chain: &str,
    ) -> HashMap<usize, Note>;
}

/// Weighted-signal implementation: sums configured weights for whatever
/// flags are present on each asset touched by a transaction (plus a flat
/// penalty for assets absent from `metadata` entirely), and emits a warning
/// note when the total clears `threshold`. The weights themselves are not
/// specified by spec.md and are supplied by the caller's config file.
pub struct ConfigDrivenScamDetector {
    pub weights: ScamSignalWeights,
}

impl ConfigDrivenScamDetector {
    pub fn new(weights: ScamSignalWeights) -> Self {
        Self { weights }
    }

    fn score_asset(&self, asset: &str, metadata: &HashMap<String, TokenMetadata>) -> (f64, Vec<String>) {
        match metadata.get(asset) {
            Some(meta) => {
                let mut score = 0.0;
                let mut hit_flags = Vec::new();
                if !meta.verified {
                    score += self.weights.unverified_weight;
                }
                for flag in &meta.flags {
                    if let Some(w) = self.weights.weights.get(flag) {
                        score += w;
                        hit_flags.push(flag.clone());
                    }
                }
                (score, hit_flags)
            }
            None => (self.weights.unverified_weight, Vec::new()),
        }
    }
}

impl ScamDetectionService for ConfigDrivenScamDetector {
    fn detect_scams(
        &self,
        movements: &[Vec<AssetMovement>],
        metadata: &HashMap<String, TokenMetadata>,
        chain: &str,
    ) -> HashMap<usize, Note> {
        let mut out = HashMap::new();
        for (idx, tx_movements) in movements.iter().enumerate() {
            let mut total = 0.0;
            let mut all_flags: Vec<String> = Vec::new();
            let mut assets: Vec<&str> = tx_movements.iter().map(|m| m.asset.as_str()).collect();
            assets.sort_unstable();
            assets.dedup();
            for asset in assets {
                let (score, flags) = self.score_asset(asset, metadata);
                total += score;
                all_flags.extend(flags);
            }
            if total >= self.weights.threshold {
                let mut note = Note::new(
                    "scam_suspected",
                    NoteSeverity::Warning,
                    format!("{chain} transaction touches asset(s) flagged by {} signal(s)", all_flags.len().max(1)),
                );
                note.metadata = Some(serde_json::json!({ "score": total, "flags": all_flags }));
                out.insert(idx, note);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Direction;

    fn movement(asset: &str) -> AssetMovement {
        AssetMovement::new(asset, rust_decimal::Decimal::ONE, Direction::In)
    }

    #[test]
    fn flagged_asset_above_threshold_emits_note() {
        let mut weights = HashMap::new();
        weights.insert("honeypot".to_string(), 2.0);
        let detector = ConfigDrivenScamDetector::new(ScamSignalWeights {
            weights,
            unverified_weight: 0.1,
            threshold: 1.0,
        });
        let mut metadata = HashMap::new();
        metadata.insert(
            "SCAM".to_string(),
            TokenMetadata {
                symbol: "SCAM".to_string(),
                verified: false,
                flags: vec!["honeypot".to_string()],
            },
        );
        let batch = vec![vec![movement("SCAM")]];
        let notes = detector.detect_scams(&batch, &metadata, "ethereum");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[&0].kind, "scam_suspected");
    }

    #[test]
    fn unknown_asset_below_threshold_is_silent() {
        let detector = ConfigDrivenScamDetector::new(ScamSignalWeights {
            weights: HashMap::new(),
            unverified_weight: 0.1,
            threshold: 1.0,
        });
        let batch = vec![vec![movement("USDC")]];
        let notes = detector.detect_scams(&batch, &HashMap::new(), "ethereum");
        assert!(notes.is_empty());
    }

    #[test]
    fn verified_asset_with_no_flags_scores_zero() {
        let detector = ConfigDrivenScamDetector::new(ScamSignalWeights::default());
        let mut metadata = HashMap::new();
        metadata.insert(
            "ETH".to_string(),
            TokenMetadata {
                symbol: "ETH".to_string(),
                verified: true,
                flags: Vec::new(),
            },
        );
        let batch = vec![vec![movement("ETH")]];
        let notes = detector.detect_scams(&batch, &metadata, "ethereum");
        assert!(notes.is_empty());
    }
}
