//! 路由回答的 JSON 结构与 Schema
//!
//! Schema 由 schemars 生成并拼入路由 prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// 路由回答：`{"selected_tool_name": "...", "extracted_params": {...}}`
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct RoutingAnswer {
    /// 选中的能力名；不需要能力时为 "none"
    #[serde(default, alias = "selectedName")]
    pub selected_tool_name: Option<String>,
    /// 从用户请求中抽取的参数，必须是扁平对象
    #[serde(default, alias = "extractedParameters")]
    pub extracted_params: Value,
    /// 需要同时调用的其他能力（可选）
    #[serde(default, deserialize_with = "lenient_list")]
    #[schemars(with = "Vec<AdditionalSelection>")]
    pub additional_tools: Vec<AdditionalSelection>,
}

/// 额外选择的能力
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct AdditionalSelection {
    #[serde(alias = "selectedName")]
    pub selected_tool_name: String,
    #[serde(default, alias = "extractedParameters")]
    pub extracted_params: Value,
}

impl RoutingAnswer {
    /// 主选择；缺失、空串或 "none" 视为未选择
    pub fn primary(&self) -> Option<&str> {
        self.selected_tool_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case("none"))
    }
}

/// 列表中无法解析的项直接丢弃，非数组视为空列表
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<AdditionalSelection>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// 返回路由回答的 JSON Schema 字符串，可拼入 system prompt
pub fn routing_answer_schema_json() -> String {
    let schema = schema_for!(RoutingAnswer);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_both_key_styles() {
        let a: RoutingAnswer = serde_json::from_value(json!({
            "selectedName": "get_weather",
            "extractedParameters": {"location": "Rome"}
        }))
        .unwrap();
        assert_eq!(a.primary(), Some("get_weather"));
        assert_eq!(a.extracted_params, json!({"location": "Rome"}));
    }

    #[test]
    fn test_none_and_bad_additional_tools() {
        let a: RoutingAnswer = serde_json::from_value(json!({
            "selected_tool_name": "None",
            "additional_tools": [{"selected_tool_name": "x"}, 42]
        }))
        .unwrap();
        assert_eq!(a.primary(), None);
        assert_eq!(a.additional_tools.len(), 1);

        let b: RoutingAnswer =
            serde_json::from_value(json!({"selected_tool_name": "x", "additional_tools": "oops"}))
                .unwrap();
        assert!(b.additional_tools.is_empty());
    }

    #[test]
    fn test_schema_mentions_fields() {
        let s = routing_answer_schema_json();
        assert!(s.contains("selected_tool_name"));
        assert!(s.contains("extracted_params"));
    }
}
