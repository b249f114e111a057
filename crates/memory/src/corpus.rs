use crate::types::PassageRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Источник корпуса для перестройки индекса
#[async_trait]
pub trait CorpusSource: Send + Sync {
    fn describe(&self) -> String;

    async fn load(&self) -> Result<Vec<PassageRecord>>;
}

/// Корпус в памяти (тесты, встраивание)
pub struct StaticCorpus {
    records: Vec<PassageRecord>,
}

impl StaticCorpus {
    pub fn new(records: Vec<PassageRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl CorpusSource for StaticCorpus {
    fn describe(&self) -> String {
        format!("static corpus ({} passages)", self.records.len())
    }

    async fn load(&self) -> Result<Vec<PassageRecord>> {
        validate(&self.records)?;
        Ok(self.records.clone())
    }
}

/// Каталог `*.json` файлов; файлы читаются в порядке имён
pub struct JsonDirCorpus {
    dir: PathBuf,
}

impl JsonDirCorpus {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CorpusSource for JsonDirCorpus {
    fn describe(&self) -> String {
        format!("json directory {}", self.dir.display())
    }

    async fn load(&self) -> Result<Vec<PassageRecord>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read corpus directory {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();

        let mut records = Vec::new();
        for path in &files {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let parsed = parse_corpus_json(&raw)
                .with_context(|| format!("Invalid corpus file {}", path.display()))?;
            debug!(file = %path.display(), passages = parsed.len(), "Corpus file parsed");
            records.extend(parsed);
        }

        validate(&records)?;
        info!(
            files = files.len(),
            passages = records.len(),
            "📚 Corpus loaded from {}",
            self.dir.display()
        );
        Ok(records)
    }
}

/// Id в исходных данных бывает и числом, и строкой
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(i64),
    Str(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Num(n) => n.to_string(),
            RawId::Str(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CardContent {
    #[serde(default)]
    overall_meaning: String,
    #[serde(default)]
    attune_to_the_moon: String,
    #[serde(default)]
    additional_meanings: Vec<String>,
    #[serde(default)]
    the_teaching: String,
}

#[derive(Debug, Deserialize)]
struct CardRecord {
    id: RawId,
    #[serde(default)]
    card: String,
    #[serde(default, alias = "short_meam")]
    short_meaning: String,
    #[serde(default)]
    kind: String,
    content: CardContent,
}

#[derive(Debug, Deserialize)]
struct FlatRecord {
    id: RawId,
    #[serde(default)]
    card_id: Option<RawId>,
    text: String,
    #[serde(default)]
    category: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CorpusRecord {
    Card(CardRecord),
    Flat(FlatRecord),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CorpusFile {
    Many(Vec<CorpusRecord>),
    One(CorpusRecord),
}

impl CardRecord {
    /// Одна карта -> по пассажу на каждую непустую секцию
    fn into_passages(self) -> Vec<PassageRecord> {
        let card_id = self.id.into_string();
        let sections = [
            ("short_meaning", self.short_meaning),
            ("overall_meaning", self.content.overall_meaning),
            ("attune_to_the_moon", self.content.attune_to_the_moon),
            (
                "additional_meanings",
                self.content.additional_meanings.join("\n"),
            ),
            ("the_teaching", self.content.the_teaching),
        ];

        sections
            .into_iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(section, text)| {
                let text = if self.card.is_empty() {
                    text
                } else {
                    format!("{}: {}", self.card, text)
                };
                PassageRecord::new(
                    format!("{card_id}#{section}"),
                    card_id.clone(),
                    text,
                    self.kind.clone(),
                )
            })
            .collect()
    }
}

impl FlatRecord {
    fn into_passage(self) -> PassageRecord {
        let id = self.id.into_string();
        let card_id = self
            .card_id
            .map(RawId::into_string)
            .unwrap_or_else(|| id.clone());
        PassageRecord::new(id, card_id, self.text, self.category)
    }
}

/// Разобрать содержимое одного файла корпуса
pub fn parse_corpus_json(raw: &str) -> Result<Vec<PassageRecord>> {
    let file: CorpusFile = serde_json::from_str(raw)?;
    let records = match file {
        CorpusFile::Many(items) => items,
        CorpusFile::One(item) => vec![item],
    };

    let mut out = Vec::new();
    for record in records {
        match record {
            CorpusRecord::Card(card) => out.extend(card.into_passages()),
            CorpusRecord::Flat(flat) => out.push(flat.into_passage()),
        }
    }
    Ok(out)
}

fn validate(records: &[PassageRecord]) -> Result<()> {
    let mut seen = HashSet::new();
    for record in records {
        if record.text.trim().is_empty() {
            anyhow::bail!("Passage {} has empty text", record.id);
        }
        if !seen.insert(record.id.as_str()) {
            anyhow::bail!("Duplicate passage id {}", record.id);
        }
    }
    Ok(())
}
