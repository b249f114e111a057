use serde::{Deserialize, Serialize};

/// Запись корпуса до вычисления эмбеддинга
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageRecord {
    pub id: String,
    #[serde(default)]
    pub card_id: String,
    pub text: String,
    #[serde(default)]
    pub category: String,
}

impl PassageRecord {
    pub fn new(
        id: impl Into<String>,
        card_id: impl Into<String>,
        text: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            card_id: card_id.into(),
            text: text.into(),
            category: category.into(),
        }
    }
}

/// Неизменяемая единица индекса: запись корпуса + её эмбеддинг
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub id: String,
    pub card_id: String,
    pub text: String,
    pub category: String,
    pub embedding: Vec<f32>,
}

impl Passage {
    pub fn from_record(record: PassageRecord, embedding: Vec<f32>) -> Self {
        Self {
            id: record.id,
            card_id: record.card_id,
            text: record.text,
            category: record.category,
            embedding,
        }
    }
}

/// Результат поиска по индексу: id пассажа и его score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

/// Пассаж с метаданными, возвращаемый вызывающему
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPassage {
    pub id: String,
    pub card_id: String,
    pub text: String,
    pub category: String,
    pub score: f32,
}

impl RankedPassage {
    pub fn new(passage: &Passage, score: f32) -> Self {
        Self {
            id: passage.id.clone(),
            card_id: passage.card_id.clone(),
            text: passage.text.clone(),
            category: passage.category.clone(),
            score,
        }
    }
}

/// Регистр и пробелы не влияют на ключ кэша
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Нормализованный запрос + top_k: один ключ для Query Cache и single-flight
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub normalized: String,
    pub top_k: usize,
}

impl QueryKey {
    pub fn new(raw_query: &str, top_k: usize) -> Self {
        Self {
            normalized: normalize_query(raw_query),
            top_k,
        }
    }

    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.top_k, self.normalized)
    }
}
