//! 远端目录列表解析
//!
//! 外部工具的 ls 输出有两种形态：结构化 JSON 与纯文本表格。
//! 这里先嗅探原始输出再选用对应解析器，统一产出 RemoteEntry。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// 归一化后的远端条目
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub mtime: i64,
}

/// 解析 ls 输出，自动识别 JSON 或文本表格
pub fn parse_listing(raw: &str) -> Vec<RemoteEntry> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        parse_json_listing(trimmed)
    } else {
        parse_tabular_listing(trimmed)
    }
}

/// JSON 形态：数组本体，或包在 data/list/files/result 键下的数组
fn parse_json_listing(raw: &str) -> Vec<RemoteEntry> {
    let Ok(parsed) = serde_json::from_str::<Value>(raw) else {
        return Vec::new();
    };
    let items: Vec<Value> = match parsed {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut found = Vec::new();
            for key in ["data", "list", "files", "result"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    found = items.clone();
                    break;
                }
            }
            found
        }
        _ => Vec::new(),
    };
    items
        .iter()
        .filter_map(normalize_entry)
        .filter(|entry| !entry.path.is_empty())
        .collect()
}

/// 宽容地把一个 JSON 条目归一化：不同版本的工具键名不一致
fn normalize_entry(entry: &Value) -> Option<RemoteEntry> {
    let obj = entry.as_object()?;
    let pick = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| obj.get(*k))
            .cloned()
            .unwrap_or(Value::Null)
    };

    let mut path = string_of(&pick(&["path", "path_lower", "Path"]));
    let name = string_of(&pick(&["name", "filename", "Filename"]));
    if path.is_empty() && !name.is_empty() {
        path = name.clone();
    }
    let name = if name.is_empty() {
        Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        name
    };
    let is_dir = bool_of(&pick(&["isdir", "is_dir", "isDir"]));
    let size = u64_of(&pick(&["size", "Size"]));
    let mtime = i64_of(&pick(&["mtime", "server_mtime", "modify_time"]));
    Some(RemoteEntry {
        path,
        name,
        is_dir,
        size,
        mtime,
    })
}

/// 文本表格形态：每行 `size 名称`，目录以 `/` 结尾；
/// 表头与分隔行（非数字开头）跳过。
fn parse_tabular_listing(raw: &str) -> Vec<RemoteEntry> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let size: u64 = parts.next()?.parse().ok()?;
            let name = parts.last()?;
            if name.is_empty() {
                return None;
            }
            let is_dir = name.ends_with('/');
            let clean = name.trim_end_matches('/').to_string();
            Some(RemoteEntry {
                name: Path::new(&clean)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| clean.clone()),
                path: clean,
                is_dir,
                size,
                mtime: 0,
            })
        })
        .collect()
}

fn string_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn bool_of(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn u64_of(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn i64_of(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_array() {
        let raw = r#"[{"path": "/video/a.mp4", "isdir": 0, "size": 1024, "server_mtime": 1756000000}]"#;
        let entries = parse_listing(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/video/a.mp4");
        assert_eq!(entries[0].name, "a.mp4");
        assert!(!entries[0].is_dir);
        assert_eq!(entries[0].size, 1024);
        assert_eq!(entries[0].mtime, 1756000000);
    }

    #[test]
    fn test_parse_json_wrapped_in_data_key() {
        let raw = r#"{"data": [{"Path": "/video/sub", "isDir": true}]}"#;
        let entries = parse_listing(raw);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].name, "sub");
    }

    #[test]
    fn test_parse_json_name_only_entry() {
        let raw = r#"{"list": [{"filename": "b.mov", "size": "2048"}]}"#;
        let entries = parse_listing(raw);
        assert_eq!(entries[0].path, "b.mov");
        assert_eq!(entries[0].size, 2048);
    }

    #[test]
    fn test_parse_tabular() {
        let raw = "文件大小 路径\n----\n1024 /video/a.mp4\n0 /video/sub/\n";
        let entries = parse_listing(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/video/a.mp4");
        assert!(!entries[0].is_dir);
        assert!(entries[1].is_dir);
        assert_eq!(entries[1].path, "/video/sub");
    }

    #[test]
    fn test_parse_garbage_returns_empty() {
        assert!(parse_listing("").is_empty());
        assert!(parse_listing("{ not json").is_empty());
    }
}
