//! 响应文本提取
//!
//! 把能力返回值转成写入账本的文本。永不失败：认不出的结构退化为紧凑 JSON。

use serde_json::Value;

use crate::llm::AgentResponse;

/// 提取响应中最合适的文本表示
pub fn extract_text(response: &AgentResponse) -> String {
    match response {
        AgentResponse::Text(text) => text.clone(),
        AgentResponse::Structured(value) => extract_from_value(value),
    }
}

fn extract_from_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(map) => {
            // OpenAI 风格：choices[0].message.content
            let choice_content = map
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"));
            if let Some(content) = choice_content.filter(|c| !c.is_null()) {
                return scalar_or_json(content);
            }
            for key in ["content", "text"] {
                if let Some(content) = map.get(key).filter(|c| !c.is_null()) {
                    return scalar_or_json(content);
                }
            }
            value.to_string()
        }
        other => other.to_string(),
    }
}

fn scalar_or_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_plain_text() {
        assert_eq!(extract_text(&AgentResponse::Text("hello".into())), "hello");
    }

    #[test]
    fn test_chat_completion_shape() {
        let resp = AgentResponse::Structured(json!({
            "choices": [{"message": {"role": "assistant", "content": "from choices"}}]
        }));
        assert_eq!(extract_text(&resp), "from choices");
    }

    #[test]
    fn test_content_field() {
        let resp = AgentResponse::Structured(json!({"content": "direct"}));
        assert_eq!(extract_text(&resp), "direct");
        let resp = AgentResponse::Structured(json!({"text": "t"}));
        assert_eq!(extract_text(&resp), "t");
    }

    #[test]
    fn test_structured_content_stringified() {
        let resp = AgentResponse::Structured(json!({"content": {"score": 3}}));
        assert_eq!(extract_text(&resp), r#"{"score":3}"#);
    }

    #[test]
    fn test_unknown_shapes_fall_back() {
        let resp = AgentResponse::Structured(json!({"choices": []}));
        assert_eq!(extract_text(&resp), r#"{"choices":[]}"#);
        assert_eq!(extract_text(&AgentResponse::Structured(json!([1, 2]))), "[1,2]");
        assert_eq!(extract_text(&AgentResponse::Structured(json!(42))), "42");
        assert_eq!(extract_text(&AgentResponse::Structured(Value::Null)), "");
        assert_eq!(extract_text(&AgentResponse::Structured(json!("s"))), "s");
    }
}
