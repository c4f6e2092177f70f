use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// hazmat 標識クラス（モデル出力順）
pub const HAZMAT_LABELS: [&str; 13] = [
    "poison",
    "oxygen",
    "flammable",
    "flammable-solid",
    "corrosive",
    "dangerous",
    "non-flammable-gas",
    "organic-peroxide",
    "explosive",
    "radioactive",
    "inhalation-hazard",
    "spontaneously-combustible",
    "infectious-substance",
];

/// クラス名の列。インデックスがモデルの class id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    pub fn new(names: Vec<String>) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Err(ConfigError::NoLabels);
        }
        Ok(Self { names })
    }

    pub fn hazmat() -> Self {
        Self {
            names: HAZMAT_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// ラベルファイルを読む: YAML のシーケンス（`.json` なら JSON 配列）
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let label_err = |reason: String| ConfigError::LabelFile {
            path: path.display().to_string(),
            reason,
        };

        let content = fs::read_to_string(path).map_err(|e| label_err(e.to_string()))?;
        let names: Vec<String> = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| label_err(e.to_string()))?,
            _ => Self::parse_yaml(&content).map_err(label_err)?,
        };
        Self::new(names)
    }

    /// モデル用のラベルファイル。無ければ組み込みの hazmat セット
    pub fn for_model<P: AsRef<Path>>(model_name: &str, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if model_name == "hazmat" && !path.exists() {
            tracing::info!("no label file at {}, using built-in hazmat labels", path.display());
            return Ok(Self::hazmat());
        }
        Self::load(path)
    }

    /// YAML のスカラーは型を問わず文字列にする
    fn parse_yaml(content: &str) -> Result<Vec<String>, String> {
        let doc: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        let seq = doc
            .as_sequence()
            .ok_or_else(|| "expected a sequence of class names".to_string())?;
        seq.iter()
            .map(|v| match v {
                serde_yaml::Value::String(s) => Ok(s.clone()),
                serde_yaml::Value::Number(n) => Ok(n.to_string()),
                serde_yaml::Value::Bool(b) => Ok(b.to_string()),
                other => Err(format!("unsupported label entry: {:?}", other)),
            })
            .collect()
    }

    /// K: 1レコードあたりのクラススコア数
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("object_locator_labels_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_hazmat_set() {
        let labels = LabelSet::hazmat();
        assert_eq!(labels.len(), 13);
        assert_eq!(labels.name(0), Some("poison"));
        assert_eq!(labels.name(12), Some("infectious-substance"));
        assert_eq!(labels.name(13), None);
    }

    #[test]
    fn test_load_yaml() {
        let path = temp_file("doors.yaml", "- door\n- handle\n- 7\n");
        let labels = LabelSet::load(&path).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.name(1), Some("handle"));
        assert_eq!(labels.name(2), Some("7"));
    }

    #[test]
    fn test_load_json() {
        let path = temp_file("valves.json", r#"["valve", "gauge"]"#);
        let labels = LabelSet::load(&path).unwrap();
        assert_eq!(labels.name(1), Some("gauge"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = LabelSet::load("/nonexistent/labels.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::LabelFile { .. }));
    }

    #[test]
    fn test_not_a_sequence() {
        let path = temp_file("bad.yaml", "name: door\n");
        let err = LabelSet::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::LabelFile { .. }));
    }

    #[test]
    fn test_empty_sequence() {
        let path = temp_file("empty.yaml", "[]\n");
        assert!(matches!(LabelSet::load(&path).unwrap_err(), ConfigError::NoLabels));
    }

    #[test]
    fn test_for_model_hazmat_fallback() {
        let labels = LabelSet::for_model("hazmat", "/nonexistent/hazmat.yaml").unwrap();
        assert_eq!(labels, LabelSet::hazmat());
        assert!(LabelSet::for_model("doors", "/nonexistent/doors.yaml").is_err());
    }
}
