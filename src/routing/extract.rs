//! 从 LLM 文本中提取结构化 JSON
//!
//! 模型常把 JSON 包在 ```json 代码块中或前后附带说明文字；
//! 这里只负责找出 JSON 对象并解析，结果为 Parsed / Unparseable，由调用方决定回退。

use serde_json::Value;

/// 提取结果
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Parsed { value: Value },
    Unparseable { reason: String },
}

/// 提取文本中的第一个 JSON 对象（支持 ```json / ``` 代码块与前后杂文）
pub fn extract_json_object(output: &str) -> Extraction {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Extraction::Unparseable {
            reason: "empty output".to_string(),
        };
    }

    let candidate = fenced_block(trimmed).unwrap_or(trimmed);
    let json_str = match (candidate.find('{'), candidate.rfind('}')) {
        (Some(start), Some(end)) if start < end => &candidate[start..=end],
        _ => {
            return Extraction::Unparseable {
                reason: "no JSON object found".to_string(),
            }
        }
    };

    match serde_json::from_str::<Value>(json_str) {
        Ok(value @ Value::Object(_)) => Extraction::Parsed { value },
        Ok(_) => Extraction::Unparseable {
            reason: "JSON is not an object".to_string(),
        },
        Err(e) => Extraction::Unparseable {
            reason: format!("{e}"),
        },
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let (start, skip) = match text.find("```json") {
        Some(i) => (i, 7),
        None => (text.find("```")?, 3),
    };
    let rest = &text[start + skip..];
    Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()))
}
