//! Retrieval request/response shapes.

use serde::{Deserialize, Serialize};

use super::ids::RequestId;

/// Caller-supplied knobs for one retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Restrict to one dataset; `None` searches the worker's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_key: Option<String>,
}

impl RetrievalOptions {
    pub fn with_max_results(mut self, n: usize) -> Self {
        self.max_results = Some(n);
        self
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn with_dataset(mut self, key: impl Into<String>) -> Self {
        self.dataset_key = Some(key.into());
        self
    }
}

/// Params of the `search` request.
pub fn search_params(id: RequestId, query: &str, options: &RetrievalOptions) -> serde_json::Value {
    let mut params = serde_json::json!({
        "request_id": id,
        "query": query,
    });
    if let Some(n) = options.max_results {
        params["max_results"] = n.into();
    }
    if let Some(n) = options.max_tokens {
        params["max_tokens"] = n.into();
    }
    if let Some(key) = &options.dataset_key {
        params["dataset_key"] = key.clone().into();
    }
    params
}

/// One ranked hit from the graph engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalEntry {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_key: Option<String>,
}

impl RetrievalEntry {
    /// Rough token estimate (4 chars per token, rounded up).
    pub fn estimated_tokens(&self) -> usize {
        self.text.chars().count().div_ceil(4)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub request_id: RequestId,
    pub entries: Vec<RetrievalEntry>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    entries: Vec<RetrievalEntry>,
}

/// Parse a `search` result and apply ranking order and caller limits.
///
/// Entries are ordered by descending score, cut to `max_results`, then cut
/// so the cumulative token estimate stays within `max_tokens`.
pub fn rank_entries(
    result: serde_json::Value,
    options: &RetrievalOptions,
) -> Result<Vec<RetrievalEntry>, serde_json::Error> {
    let parsed: SearchResult = serde_json::from_value(result)?;
    let mut entries = parsed.entries;
    entries.sort_by(|a, b| b.score.total_cmp(&a.score));

    if let Some(n) = options.max_results {
        entries.truncate(n);
    }

    if let Some(budget) = options.max_tokens {
        let mut used = 0usize;
        let keep = entries
            .iter()
            .take_while(|entry| {
                used += entry.estimated_tokens();
                used <= budget
            })
            .count();
        entries.truncate(keep);
    }

    Ok(entries)
}
