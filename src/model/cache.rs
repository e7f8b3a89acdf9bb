//! モデルキャッシュのディスクレイアウト
//!
//! `<root>/<model-type>/<model_id>.onnx` に確定済みアーティファクトを置く。
//! ファイル名（拡張子抜き）= model_id。追加のみで書き換えは行わず、
//! インストールはステージング領域からのアトミックrenameで行う。

use std::fs::File;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::ModelError;

/// 確定済みアーティファクトの拡張子
pub const MODEL_EXTENSION: &str = "onnx";

/// ダウンロード・展開済みのオンデバイスモデル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModel {
    pub model_id: String,
    pub local_path: PathBuf,
}

/// ディレクトリを走査してキャッシュ済みモデルを列挙する（新しい順）
///
/// ディレクトリが無い・読めない場合は空を返す。キャッシュ欠落は
/// 「未ダウンロード」と同じ扱いでよい。
pub fn list_cached(dir: &Path) -> Vec<CachedModel> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut models: Vec<(std::time::SystemTime, CachedModel)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MODEL_EXTENSION) {
                return None;
            }
            let model_id = path.file_stem()?.to_str()?.to_string();
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            Some((
                modified,
                CachedModel {
                    model_id,
                    local_path: path,
                },
            ))
        })
        .collect();

    models.sort_by(|a, b| b.0.cmp(&a.0));
    models.into_iter().map(|(_, model)| model).collect()
}

/// ダウンロード済みzipアーカイブを展開し、単一のモデルパッケージを見つける
///
/// アーカイブにはちょうど1つの `.onnx` パッケージが含まれている想定。
/// 展開先のパッケージパスを返す。
pub fn extract_model_archive(archive_path: &Path, dest_dir: &Path) -> Result<PathBuf, ModelError> {
    let file = File::open(archive_path)
        .map_err(|e| ModelError::CompileFailed(format!("cannot open archive: {e}")))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| ModelError::CompileFailed(format!("invalid model archive: {e}")))?;

    std::fs::create_dir_all(dest_dir)
        .map_err(|e| ModelError::CompileFailed(format!("cannot create extract dir: {e}")))?;
    archive
        .extract(dest_dir)
        .map_err(|e| ModelError::CompileFailed(format!("archive extraction failed: {e}")))?;

    find_model_package(dest_dir).ok_or_else(|| {
        ModelError::CompileFailed("archive does not contain a model package".to_string())
    })
}

fn find_model_package(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(MODEL_EXTENSION) {
            return Some(path);
        }
        // zipのトップレベルが1ディレクトリの場合は1段だけ降りる
        if path.is_dir() {
            if let Some(nested) = find_model_package(&path) {
                return Some(nested);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_test_archive(path: &Path, entry_name: &str, content: &[u8]) {
        let file = File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        writer
            .start_file(entry_name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_list_cached_empty_for_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_cached(&missing).is_empty());
    }

    #[test]
    fn test_list_cached_uses_file_stem_as_model_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc-123.onnx"), b"model").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let cached = list_cached(dir.path());
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].model_id, "abc-123");
        assert_eq!(cached[0].local_path, dir.path().join("abc-123.onnx"));
    }

    #[test]
    fn test_extract_model_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("model.zip");
        write_test_archive(&archive, "pose-v2.onnx", b"fake-onnx");

        let extracted = extract_model_archive(&archive, &dir.path().join("out")).unwrap();
        assert_eq!(extracted.file_name().unwrap(), "pose-v2.onnx");
        assert_eq!(std::fs::read(&extracted).unwrap(), b"fake-onnx");
    }

    #[test]
    fn test_extract_model_archive_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("model.zip");
        write_test_archive(&archive, "package/pose-v2.onnx", b"fake-onnx");

        let extracted = extract_model_archive(&archive, &dir.path().join("out")).unwrap();
        assert_eq!(extracted.file_name().unwrap(), "pose-v2.onnx");
    }

    #[test]
    fn test_extract_rejects_archive_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("model.zip");
        write_test_archive(&archive, "readme.md", b"no model here");

        let err = extract_model_archive(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ModelError::CompileFailed(_)));
    }

    #[test]
    fn test_extract_rejects_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("model.zip");
        std::fs::write(&archive, b"this is not a zip").unwrap();

        let err = extract_model_archive(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ModelError::CompileFailed(_)));
    }
}
