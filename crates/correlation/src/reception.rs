//! Reception selection.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// One observation of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reception {
    pub hop_count: u32,
    #[serde(default)]
    pub snr: Option<f64>,
    #[serde(default)]
    pub rssi: Option<f64>,
    #[serde(default)]
    pub path_nodes: Vec<String>,
    #[serde(default)]
    pub observed_at_ms: u64,
}

impl Reception {
    /// `"a1 → b2"`, or `"direct"` for an empty path.
    pub fn path_label(&self) -> String {
        path_label(&self.path_nodes)
    }
}

pub fn path_label(nodes: &[String]) -> String {
    if nodes.is_empty() {
        "direct".to_string()
    } else {
        nodes.join(" → ")
    }
}

/// Best reception: fewest hops (so any direct reception wins), then the
/// highest SNR with a missing SNR ranking lowest. The earliest wins ties.
pub fn best_reception(receptions: &[Reception]) -> Option<&Reception> {
    receptions.iter().reduce(|best, candidate| {
        let better = match candidate.hop_count.cmp(&best.hop_count) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => snr_rank(candidate.snr) > snr_rank(best.snr),
        };
        if better { candidate } else { best }
    })
}

/// Reception with the most hops. The earliest wins ties.
pub fn longest_path(receptions: &[Reception]) -> Option<&Reception> {
    receptions
        .iter()
        .reduce(|longest, candidate| {
            if candidate.hop_count > longest.hop_count {
                candidate
            } else {
                longest
            }
        })
}

fn snr_rank(snr: Option<f64>) -> f64 {
    snr.unwrap_or(f64::NEG_INFINITY)
}
