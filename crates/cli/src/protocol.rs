//! Построчный протокол `oracle serve`: запрос на строку stdin, JSON ответ на строку stdout.

use anyhow::{Context, Result};
use common::RetrievalFailure;
use memory::{RankedPassage, RebuildReport};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Строка, запускающая перестройку корпуса
pub const REBUILD_COMMAND: &str = ":rebuild";

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Query {
        id: Option<Value>,
        query: String,
        top_k: usize,
    },
    Rebuild,
}

#[derive(Debug, Deserialize)]
struct JsonRequest {
    #[serde(default)]
    id: Option<Value>,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

impl Request {
    /// `None` для пустой строки
    pub fn parse(line: &str, default_top_k: usize) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if line == REBUILD_COMMAND {
            return Ok(Some(Request::Rebuild));
        }
        if line.starts_with('{') {
            let parsed: JsonRequest =
                serde_json::from_str(line).context("Malformed JSON request")?;
            return Ok(Some(Request::Query {
                id: parsed.id,
                query: parsed.query,
                top_k: parsed.top_k.unwrap_or(default_top_k),
            }));
        }
        Ok(Some(Request::Query {
            id: None,
            query: line.to_string(),
            top_k: default_top_k,
        }))
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        query: String,
        top_k: usize,
        results: Vec<RankedPassage>,
    },
    Rebuilt {
        report: RebuildReport,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        code: String,
        message: String,
    },
}

impl Response {
    pub fn failure(id: Option<Value>, failure: &RetrievalFailure) -> Self {
        Response::Error {
            id,
            code: failure.code().to_string(),
            message: failure.cause().to_string(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Response::Error {
            id: None,
            code: "invalid_request".to_string(),
            message: message.into(),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({
                "status": "error",
                "code": "serialization",
                "message": e.to_string(),
            })
            .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PipelineError;
    use serde_json::json;

    #[test]
    fn test_plain_text_uses_default_top_k() {
        let request = Request::parse("  Full Moon in Pisces \n", 3).unwrap();
        assert_eq!(
            request,
            Some(Request::Query {
                id: None,
                query: "Full Moon in Pisces".into(),
                top_k: 3,
            })
        );
    }

    #[test]
    fn test_json_request_with_id_and_top_k() {
        let request = Request::parse(r#"{"id": 7, "query": "eclipse", "top_k": 5}"#, 3).unwrap();
        assert_eq!(
            request,
            Some(Request::Query {
                id: Some(json!(7)),
                query: "eclipse".into(),
                top_k: 5,
            })
        );
    }

    #[test]
    fn test_rebuild_and_blank_lines() {
        assert_eq!(Request::parse(":rebuild", 3).unwrap(), Some(Request::Rebuild));
        assert_eq!(Request::parse("   ", 3).unwrap(), None);
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(Request::parse(r#"{"top_k": 2}"#, 3).is_err());
        assert!(Request::parse("{not json", 3).is_err());
    }

    #[test]
    fn test_error_response_shape() {
        let failure = RetrievalFailure::new(PipelineError::InvalidQuery("empty query".into()));
        let line = Response::failure(Some(json!("req-1")), &failure).to_line();
        let value: Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["status"], "error");
        assert_eq!(value["id"], "req-1");
        assert_eq!(value["code"], "invalid_query");
        assert!(value["message"].as_str().unwrap().contains("empty query"));
    }
}
