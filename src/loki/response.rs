use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Decoded body of a `query_range` response.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct QueryResult {
    pub status: String,
    #[serde(default)]
    pub data: QueryData,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    #[serde(default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<StreamResult>,
    #[serde(default)]
    pub stats: QueryStats,
}

/// One stream: its label set and `[timestamp, line, ...]` values.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct StreamResult {
    #[serde(default)]
    pub stream: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

impl StreamResult {
    /// Log lines of the stream. Values without a string line are skipped.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .filter_map(|value| value.get(1).and_then(serde_json::Value::as_str))
    }
}

impl QueryResult {
    /// Total number of values across all streams.
    pub fn entry_count(&self) -> usize {
        self.data.result.iter().map(|stream| stream.values.len()).sum()
    }

    /// Parses every log line as a JSON document of type `T`. Lines that do not parse are skipped.
    pub fn log_entities<T: DeserializeOwned>(&self) -> Vec<T> {
        self.data
            .result
            .iter()
            .flat_map(StreamResult::lines)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QueryStats {
    pub summary: SummaryStats,
    pub store: StoreStats,
    pub ingester: IngesterStats,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SummaryStats {
    pub bytes_processed_per_second: i64,
    pub lines_processed_per_second: i64,
    pub total_bytes_processed: i64,
    pub total_lines_processed: i64,
    pub exec_time: f64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreStats {
    pub total_chunks_ref: i64,
    pub total_chunks_downloaded: i64,
    pub chunks_download_time: f64,
    pub head_chunk_bytes: i64,
    pub head_chunk_lines: i64,
    pub decompressed_bytes: i64,
    pub decompressed_lines: i64,
    pub compressed_bytes: i64,
    pub total_duplicates: i64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct IngesterStats {
    pub total_reached: i64,
    pub total_chunks_matched: i64,
    pub total_batches: i64,
    pub total_lines_sent: i64,
    pub head_chunk_bytes: i64,
    pub head_chunk_lines: i64,
    pub decompressed_bytes: i64,
    pub decompressed_lines: i64,
    pub compressed_bytes: i64,
    pub total_duplicates: i64,
}

/// Body of the label name and label value endpoints.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct LabelResponse {
    pub status: String,
    #[serde(default)]
    pub data: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "streams",
            "result": [
                {
                    "stream": {"kubernetes_namespace_name": "e2e", "log_type": "application"},
                    "values": [
                        ["1700000000000000000", "{\"message\":\"hello\",\"level\":\"info\"}"],
                        ["1700000001000000000", "plain text line"]
                    ]
                },
                {
                    "stream": {"kubernetes_namespace_name": "e2e"},
                    "values": [["1700000002000000000", "{\"message\":\"bye\"}", {"trace_id": "abc"}]]
                }
            ],
            "stats": {
                "summary": {"totalLinesProcessed": 3, "execTime": 0.0125},
                "store": {"totalChunksRef": 2, "chunksDownloadTime": 1},
                "querier": {"store": {"totalChunksRef": 2}}
            }
        }
    }"#;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Entity {
        message: String,
    }

    #[test]
    fn decodes_streams_and_stats() {
        let result: QueryResult = serde_json::from_str(BODY).unwrap();

        assert_eq!(result.status, "success");
        assert_eq!(result.data.result_type, "streams");
        assert_eq!(result.entry_count(), 3);
        assert_eq!(result.data.stats.summary.total_lines_processed, 3);
        assert_eq!(result.data.stats.store.total_chunks_ref, 2);
        assert_eq!(result.data.stats.ingester, IngesterStats::default());
        assert_eq!(
            result.data.result[0].stream.get("log_type").map(String::as_str),
            Some("application")
        );
    }

    #[test]
    fn log_entities_skip_non_json_lines() {
        let result: QueryResult = serde_json::from_str(BODY).unwrap();
        let entities = result.log_entities::<Entity>();
        assert_eq!(
            entities,
            vec![
                Entity {
                    message: "hello".into()
                },
                Entity {
                    message: "bye".into()
                },
            ]
        );
    }
}
