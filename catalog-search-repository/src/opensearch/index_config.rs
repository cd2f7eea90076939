//! OpenSearch index configuration and mappings.
//!
//! This module defines the settings and mappings every catalog index is
//! created with.

use catalog_search_shared::fields;
use serde_json::{json, Value};

/// Configuration for a catalog index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Number of primary shards.
    pub number_of_shards: u32,
    /// Number of replicas of each shard.
    pub number_of_replicas: u32,
    /// Largest `from + size` the index accepts for paged searches.
    pub max_result_window: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            number_of_shards: 1,
            number_of_replicas: 1,
            max_result_window: 10_000,
        }
    }
}

impl IndexConfig {
    /// Create a new index configuration.
    ///
    /// # Arguments
    ///
    /// * `number_of_shards` - The number of primary shards
    /// * `number_of_replicas` - The number of replicas
    pub fn new(number_of_shards: u32, number_of_replicas: u32) -> Self {
        Self {
            number_of_shards,
            number_of_replicas,
            ..Self::default()
        }
    }

    pub fn with_max_result_window(mut self, max_result_window: usize) -> Self {
        self.max_result_window = max_result_window;
        self
    }
}

/// Get the index settings and mappings for a catalog index.
///
/// The configuration includes:
/// - **Keyword fields**: `docId` and `type`, used for lookups and type filters
/// - **Dynamic strings**: analyzed text with a `.keyword` sibling for exact
///   matches, sorting and string facets
/// - **Dynamic numbers**: mapped as `double` so that integer and decimal
///   values of one attribute share a type
/// - **geo_shape**: the `geometry` field, for spatial criteria
pub fn get_index_settings(config: &IndexConfig) -> Value {
    json!({
        "settings": {
            "number_of_shards": config.number_of_shards,
            "number_of_replicas": config.number_of_replicas,
            "index.max_result_window": config.max_result_window
        },
        "mappings": {
            "dynamic_templates": [
                {
                    "strings": {
                        "match_mapping_type": "string",
                        "mapping": {
                            "type": "text",
                            "fields": {
                                "keyword": {
                                    "type": "keyword",
                                    "ignore_above": 256
                                }
                            }
                        }
                    }
                },
                {
                    "numbers": {
                        "match_mapping_type": "long",
                        "mapping": {
                            "type": "double"
                        }
                    }
                }
            ],
            "properties": {
                (fields::DOC_ID): { "type": "keyword" },
                (fields::TYPE): { "type": "keyword" },
                (fields::LAST): { "type": "boolean" },
                (fields::GEOMETRY): { "type": "geo_shape" }
            }
        }
    })
}
