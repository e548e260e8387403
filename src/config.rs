//! Engine configuration, including the chunked-field rule table.
//!
//! Chunking rules are a static, pre-generated table supplied by the caller
//! (or the defaults below); the engine never derives them from upstream
//! schema definitions at runtime.

/// How a (table, column) pair participates in chunked storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPriority {
    /// Value is stored inline regardless of size.
    Never,
    /// Value is always split into pieces, even below the threshold.
    Always,
    /// Value is split only when its byte length exceeds the threshold.
    SizeBased,
}

/// One entry in the chunking rule table. `table: None` is a wildcard
/// matching the column in any table.
#[derive(Debug, Clone)]
pub struct ChunkRule {
    pub table: Option<String>,
    pub column: String,
    pub priority: ChunkPriority,
    pub threshold: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Byte threshold applied when no rule names the column.
    pub default_threshold: usize,
    /// Size of each stored piece.
    pub piece_size: usize,
    pub rules: Vec<ChunkRule>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            // The embedded store rejects values near 2 MB; stay under it.
            default_threshold: 1_800_000,
            piece_size: 100_000,
            rules: Vec::new(),
        }
    }
}

impl ChunkingConfig {
    /// Resolve the effective policy for a cell. Exact (table, column) rules
    /// win over wildcard column rules, which win over the default.
    pub fn policy_for(&self, table: &str, column: &str) -> (ChunkPriority, usize) {
        let mut wildcard: Option<&ChunkRule> = None;
        for rule in &self.rules {
            if rule.column != column {
                continue;
            }
            match rule.table.as_deref() {
                Some(t) if t == table => {
                    return (rule.priority, rule.threshold.unwrap_or(self.default_threshold));
                }
                Some(_) => {}
                None => wildcard = wildcard.or(Some(rule)),
            }
        }
        if let Some(rule) = wildcard {
            return (rule.priority, rule.threshold.unwrap_or(self.default_threshold));
        }
        (ChunkPriority::SizeBased, self.default_threshold)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rows of sample data returned per table by `process` and `schema`.
    pub sample_rows: usize,
    /// Cap on rows returned by a single `query` call.
    pub max_result_rows: usize,
    pub chunking: ChunkingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rows: 3,
            max_result_rows: 1000,
            chunking: ChunkingConfig::default(),
        }
    }
}
