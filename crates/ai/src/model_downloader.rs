use anyhow::{Context, Result};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

const HF_BASE_URL: &str = "https://huggingface.co";

/// Файлы, без которых sentence-transformer модель не загрузится
const REQUIRED_FILES: [&str; 3] = ["model.onnx", "tokenizer.json", "config.json"];

pub struct ModelDownloader {
    base_path: PathBuf,
    base_url: String,
    client: reqwest::Client,
}

/// Информация о модели
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub repo: String,
    pub files: Vec<ModelFile>,
}

#[derive(Debug, Clone)]
pub struct ModelFile {
    pub filename: String,
    /// Пути внутри репозитория, пробуются по порядку
    pub remote_paths: Vec<String>,
    pub sha256: Option<String>,
}

async fn verify_sha256(path: &Path, expected_hex: &str) -> Result<bool> {
    use sha2::{Digest, Sha256};
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let result = hasher.finalize();
    let hex = format!("{result:x}");
    Ok(hex.eq_ignore_ascii_case(expected_hex))
}

impl ModelDownloader {
    /// Создать новый загрузчик моделей
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(token) = std::env::var("HF_TOKEN") {
            if !token.is_empty() {
                if let Ok(value) =
                    reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                {
                    headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
        }

        let client = reqwest::Client::builder()
            .user_agent("oracle-retrieval/0.1")
            .timeout(std::time::Duration::from_secs(300))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base_path: base_path.as_ref().to_path_buf(),
            base_url: HF_BASE_URL.to_string(),
            client,
        })
    }

    /// Зеркало Hugging Face (или mock сервер в тестах)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Проверить и загрузить модель если необходимо
    pub async fn ensure_model(&self, model_name: &str, repo: &str) -> Result<PathBuf> {
        let model_path = self.base_path.join(model_name);

        if self.is_model_complete(&model_path).await? {
            info!("✅ Модель {} уже загружена", model_name);
            return Ok(model_path);
        }

        let model_info = Self::model_info(model_name, repo);
        info!("📥 Загрузка модели {} из {}", model_name, repo);

        fs::create_dir_all(&model_path).await?;

        for file in &model_info.files {
            self.download_file(&model_info, file, &model_path).await?;
        }

        info!("✅ Модель {} успешно загружена", model_name);
        Ok(model_path)
    }

    /// Проверить что модель полностью загружена
    pub async fn is_model_complete(&self, model_path: &Path) -> Result<bool> {
        if !model_path.exists() {
            return Ok(false);
        }

        for file in REQUIRED_FILES {
            let file_path = model_path.join(file);
            if !file_path.exists() {
                return Ok(false);
            }

            let metadata = fs::metadata(&file_path).await?;
            if metadata.len() == 0 {
                warn!("⚠️ Файл {} пустой", file);
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Описание файлов sentence-transformer репозитория
    pub fn model_info(model_name: &str, repo: &str) -> ModelInfo {
        ModelInfo {
            name: model_name.to_string(),
            repo: repo.to_string(),
            files: vec![
                ModelFile {
                    filename: "model.onnx".to_string(),
                    remote_paths: vec!["onnx/model.onnx".to_string(), "model.onnx".to_string()],
                    sha256: None,
                },
                ModelFile {
                    filename: "tokenizer.json".to_string(),
                    remote_paths: vec!["tokenizer.json".to_string()],
                    sha256: None,
                },
                ModelFile {
                    filename: "config.json".to_string(),
                    remote_paths: vec!["config.json".to_string()],
                    sha256: None,
                },
            ],
        }
    }

    fn candidate_urls(&self, info: &ModelInfo, file: &ModelFile) -> Vec<String> {
        file.remote_paths
            .iter()
            .map(|p| format!("{}/{}/resolve/main/{}", self.base_url, info.repo, p))
            .collect()
    }

    async fn download_file(&self, info: &ModelInfo, file: &ModelFile, dest_dir: &Path) -> Result<()> {
        let dest_path = dest_dir.join(&file.filename);

        if dest_path.exists() && fs::metadata(&dest_path).await?.len() > 0 {
            match &file.sha256 {
                Some(sum) if !verify_sha256(&dest_path, sum).await? => {
                    warn!("Checksum mismatch for existing {}, re-downloading", file.filename);
                }
                _ => {
                    info!("✅ Файл {} уже загружен", file.filename);
                    return Ok(());
                }
            }
        }

        let candidates = self.candidate_urls(info, file);
        let mut last_err: Option<anyhow::Error> = None;
        for (idx, url) in candidates.iter().enumerate() {
            match self.try_download_once(url, file, &dest_path).await {
                Ok(()) => {
                    info!("✅ {} загружен из {}", file.filename, url);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Попытка {}/{}: не удалось скачать {} из {}: {}",
                        idx + 1,
                        candidates.len(),
                        file.filename,
                        url,
                        e
                    );
                    last_err = Some(e);
                    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Не удалось скачать {}", file.filename)))
    }

    async fn try_download_once(&self, url: &str, file: &ModelFile, dest_path: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Ошибка при запросе файла")?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Ошибка загрузки {}: HTTP {}",
                file.filename,
                response.status()
            ));
        }

        // Частично скачанный файл никогда не лежит под итоговым именем
        let temp_path = dest_path.with_extension("tmp");
        let mut temp_file = tokio::fs::File::create(&temp_path).await?;

        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            temp_file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }

        temp_file.flush().await?;
        drop(temp_file);

        if downloaded == 0 {
            let _ = fs::remove_file(&temp_path).await;
            return Err(anyhow::anyhow!("Пустой ответ для {}", file.filename));
        }

        if let Some(sum) = &file.sha256 {
            if !verify_sha256(&temp_path, sum).await? {
                let _ = fs::remove_file(&temp_path).await;
                return Err(anyhow::anyhow!(
                    "Checksum verification failed for {}",
                    file.filename
                ));
            }
        }

        fs::rename(&temp_path, &dest_path).await?;
        info!(
            "✅ {} загружен ({:.1} MB)",
            file.filename,
            downloaded as f64 / 1024.0 / 1024.0
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

    #[tokio::test]
    async fn test_model_detection() {
        let temp_dir = TempDir::new().expect("Operation should succeed");
        let downloader = ModelDownloader::new(temp_dir.path()).expect("Operation should succeed");

        let model_path = temp_dir.path().join("all-MiniLM-L6-v2");
        assert!(!downloader.is_model_complete(&model_path).await.expect("check"));

        fs::create_dir_all(&model_path).await.expect("mkdir");
        fs::write(model_path.join("model.onnx"), b"fake").await.expect("write");
        fs::write(model_path.join("tokenizer.json"), b"fake").await.expect("write");
        // config.json пустой - модель неполная
        fs::write(model_path.join("config.json"), b"").await.expect("write");
        assert!(!downloader.is_model_complete(&model_path).await.expect("check"));

        fs::write(model_path.join("config.json"), b"{}").await.expect("write");
        assert!(downloader.is_model_complete(&model_path).await.expect("check"));
    }

    #[tokio::test]
    async fn test_downloads_with_fallback_path() {
        let server = MockServer::start().await;
        // onnx/model.onnx отсутствует, корневой model.onnx есть
        Mock::given(method("GET"))
            .and(path(format!("/{REPO}/resolve/main/onnx/model.onnx")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/{REPO}/resolve/main/model.onnx")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"onnx-bytes".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/{REPO}/resolve/main/tokenizer.json")))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"model\":{}}"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/{REPO}/resolve/main/config.json")))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"hidden_size\":384}"))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().expect("tempdir");
        let downloader = ModelDownloader::new(temp_dir.path())
            .expect("client")
            .with_base_url(server.uri());

        let model_path = downloader
            .ensure_model("all-MiniLM-L6-v2", REPO)
            .await
            .expect("download");

        assert!(downloader.is_model_complete(&model_path).await.expect("check"));
        let bytes = fs::read(model_path.join("model.onnx")).await.expect("read");
        assert_eq!(bytes, b"onnx-bytes");
        assert!(!model_path.join("model.tmp").exists());
    }

    #[tokio::test]
    async fn test_download_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().expect("tempdir");
        let downloader = ModelDownloader::new(temp_dir.path())
            .expect("client")
            .with_base_url(server.uri());

        let result = downloader.ensure_model("all-MiniLM-L6-v2", REPO).await;
        assert!(result.is_err());
        assert!(!temp_dir.path().join("all-MiniLM-L6-v2/model.onnx").exists());
    }
}
