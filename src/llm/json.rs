//! LLM 输出的 JSON 提取与结构校验
//!
//! 模型输出常夹杂说明文字或 ```json 代码块；这里逐个扫描 `{` / `[` 起点，找到括号配平且能被 serde_json
//! 解析的第一段作为结果。解析结果统一为 ParsedOutput（Ok / ParseError），再经 Validate 校验后才交给业务使用。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// 带标签的解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOutput<T> {
    Ok(T),
    ParseError(String),
}

impl<T> ParsedOutput<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            ParsedOutput::Ok(v) => Some(v),
            ParsedOutput::ParseError(_) => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ParsedOutput::Ok(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ParsedOutput::Ok(_) => None,
            ParsedOutput::ParseError(e) => Some(e.as_str()),
        }
    }
}

/// 反序列化后的业务校验：清洗字段（截断、夹取区间），不合格返回 Err
pub trait Validate: Sized {
    fn validate(self) -> Result<Self, String>;
}

impl Validate for String {
    fn validate(self) -> Result<Self, String> {
        let trimmed = self.trim();
        if trimmed.is_empty() {
            Err("empty string".to_string())
        } else {
            Ok(trimmed.to_string())
        }
    }
}

/// 列表：丢弃不合格元素；输入非空但全部不合格时视为失败
impl<T: Validate> Validate for Vec<T> {
    fn validate(self) -> Result<Self, String> {
        let total = self.len();
        let mut last_err = None;
        let valid: Vec<T> = self
            .into_iter()
            .filter_map(|item| match item.validate() {
                Ok(v) => Some(v),
                Err(e) => {
                    last_err = Some(e);
                    None
                }
            })
            .collect();
        if total > 0 && valid.is_empty() {
            return Err(last_err.unwrap_or_else(|| "no valid items".to_string()));
        }
        Ok(valid)
    }
}

/// 找到 s 起始处括号对应的闭合位置（字节下标）；感知字符串与转义
fn matching_close(s: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// 扫描文本，返回第一个可解析的顶层 JSON 对象或数组
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let mut start = 0;
    while start < text.len() {
        let offset = text[start..].find(['{', '['])?;
        let begin = start + offset;
        if let Some(end) = matching_close(&text[begin..]) {
            let candidate = &text[begin..=begin + end];
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
                return Some(value);
            }
        }
        start = begin + 1;
    }
    None
}

/// 提取 JSON 并反序列化为 T，随后执行 Validate
pub fn parse_structured<T: DeserializeOwned + Validate>(text: &str) -> ParsedOutput<T> {
    let Some(value) = extract_json(text) else {
        return ParsedOutput::ParseError("no JSON object or array found".to_string());
    };
    from_value(value)
}

/// 解析列表：接受裸数组，或 `{"<key>": [...]}` 包装形式
pub fn parse_list<T: DeserializeOwned + Validate>(text: &str, key: &str) -> ParsedOutput<Vec<T>> {
    let Some(value) = extract_json(text) else {
        return ParsedOutput::ParseError("no JSON object or array found".to_string());
    };
    let value = match value {
        serde_json::Value::Object(mut map) => match map.remove(key) {
            Some(inner @ serde_json::Value::Array(_)) => inner,
            _ => return ParsedOutput::ParseError(format!("object without \"{key}\" array")),
        },
        other => other,
    };
    from_value(value)
}

fn from_value<T: DeserializeOwned + Validate>(value: serde_json::Value) -> ParsedOutput<T> {
    match serde_json::from_value::<T>(value) {
        Ok(parsed) => match parsed.validate() {
            Ok(valid) => ParsedOutput::Ok(valid),
            Err(e) => ParsedOutput::ParseError(format!("validation failed: {e}")),
        },
        Err(e) => ParsedOutput::ParseError(e.to_string()),
    }
}

/// 目标结构的 JSON Schema，拼入 prompt 约束模型输出
pub fn schema_hint<T: JsonSchema>() -> String {
    let schema = schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Item {
        name: String,
        score: f64,
    }

    impl Validate for Item {
        fn validate(mut self) -> Result<Self, String> {
            if self.name.trim().is_empty() {
                return Err("empty name".into());
            }
            self.score = self.score.clamp(0.0, 1.0);
            Ok(self)
        }
    }

    #[test]
    fn test_extract_from_fenced_block() {
        let text = "Here:\n```json\n{\"name\": \"a\", \"score\": 0.5}\n```";
        let v = extract_json(text).unwrap();
        assert_eq!(v["name"], "a");
    }

    #[test]
    fn test_extract_skips_non_json_brackets() {
        let text = "see [1] and [note: x] then [{\"name\": \"b\", \"score\": 2}]";
        let v = extract_json(text).unwrap();
        assert!(v.is_array());
        assert_eq!(v[0]["name"], "b");
    }

    #[test]
    fn test_extract_braces_inside_strings() {
        let text = r#"{"name": "has } brace", "score": 1}"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["name"], "has } brace");
    }

    #[test]
    fn test_extract_unbalanced_returns_none() {
        assert!(extract_json("{\"name\": \"x\"").is_none());
        assert!(extract_json("plain text").is_none());
    }

    #[test]
    fn test_parse_structured_validates() {
        let parsed: ParsedOutput<Item> = parse_structured("{\"name\": \"x\", \"score\": 3.0}");
        let item = parsed.ok().unwrap();
        assert_eq!(item.score, 1.0);

        let parsed: ParsedOutput<Item> = parse_structured("{\"name\": \" \", \"score\": 0.1}");
        assert!(!parsed.is_ok());
    }

    #[test]
    fn test_parse_list_drops_invalid_items() {
        let parsed: ParsedOutput<Vec<Item>> = parse_list(
            r#"{"items": [{"name": "ok", "score": 0.2}, {"name": "", "score": 0.9}]}"#,
            "items",
        );
        let items = parsed.ok().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "ok");
    }

    #[test]
    fn test_parse_list_wrong_shape() {
        let parsed: ParsedOutput<Vec<Item>> = parse_list(r#"{"other": 1}"#, "items");
        assert!(parsed.error().is_some());
    }

    #[test]
    fn test_schema_hint_mentions_fields() {
        let schema = schema_hint::<Item>();
        assert!(schema.contains("score"));
    }
}
