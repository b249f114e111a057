use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[cfg(target_os = "windows")]
const LIB_NAME: &str = "onnxruntime.dll";
#[cfg(target_os = "linux")]
const LIB_NAME: &str = "libonnxruntime.so";
#[cfg(target_os = "macos")]
const LIB_NAME: &str = "libonnxruntime.dylib";

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(dir) = std::env::var("ORT_DIR") {
        paths.push(Path::new(&dir).join("lib").join(LIB_NAME));
        paths.push(Path::new(&dir).join(LIB_NAME));
    }

    paths.push(Path::new("onnxruntime/lib").join(LIB_NAME));
    paths.push(Path::new("models/onnxruntime/lib").join(LIB_NAME));

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        paths.push(Path::new("/usr/local/lib").join(LIB_NAME));
        paths.push(Path::new("/usr/lib").join(LIB_NAME));
        paths.push(Path::new("/opt/onnxruntime/lib").join(LIB_NAME));
    }

    // Рядом с бинарником
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            paths.push(dir.join(LIB_NAME));
            paths.push(dir.join("onnxruntime").join("lib").join(LIB_NAME));
        }
    }

    paths
}

/// Найти динамическую библиотеку ONNX Runtime и выставить `ORT_DYLIB_PATH`
pub fn configure_ort_env() {
    if std::env::var("ORT_DYLIB_PATH").is_ok() {
        return;
    }

    match candidate_paths().into_iter().find(|p| p.exists()) {
        Some(path) => {
            std::env::set_var("ORT_DYLIB_PATH", &path);
            info!(target: "ai::ort_setup", "ONNX Runtime set: ORT_DYLIB_PATH={}", path.display());
        }
        None => {
            warn!(target: "ai::ort_setup", "ONNX Runtime library not found. Set ORT_DYLIB_PATH or ORT_DIR.");
        }
    }
}
