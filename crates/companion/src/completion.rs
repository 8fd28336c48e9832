use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 发送给模型的一条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// 对外部模型服务的最小抽象，没有重试
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// 以 `system_prompt` 作为系统指令、`history` 作为对话上下文请求一次补全
    async fn complete(&self, model: &str, system_prompt: &str, history: &[ChatMessage]) -> Result<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn build_request<'a>(model: &'a str, system_prompt: &str, history: &[ChatMessage]) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::new("system", system_prompt));
    messages.extend(history.iter().cloned());
    ChatRequest { model, messages }
}

fn extract_reply(resp: ChatResponse) -> Result<String> {
    resp.choices
        .into_iter()
        .next()
        .map(|c| c.message.content.unwrap_or_default())
        .ok_or_else(|| anyhow!("模型未返回任何结果"))
}

/// OpenAI 兼容的 chat/completions 客户端
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, model: &str, system_prompt: &str, history: &[ChatMessage]) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| anyhow!("未配置 API_KEY"))?;
        let req_body = build_request(model, system_prompt, history);

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&req_body)
            .send()
            .await
            .with_context(|| format!("请求模型 {} 失败", model))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("模型 {} 请求失败: {} {}", model, status, body));
        }

        let resp: ChatResponse = res.json().await.context("解析模型响应失败")?;
        let reply = extract_reply(resp)?;
        debug!("模型 {} 返回 {} 个字符", model, reply.chars().count());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_puts_system_prompt_first() {
        let history = vec![
            ChatMessage::new("assistant", "Hi, how are you today?"),
            ChatMessage::new("user", "hello"),
        ];
        let req = build_request("gpt-4o", "be kind", &history);
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["model"], "gpt-4o");
        let messages = value["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be kind");
        assert_eq!(messages[2]["content"], "hello");
    }

    #[test]
    fn test_extract_reply_takes_first_choice() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"hi there"}},{"message":{"content":"ignored"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_reply(resp).unwrap(), "hi there");
    }

    #[test]
    fn test_extract_reply_handles_null_and_empty_choices() {
        let resp: ChatResponse = serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        assert_eq!(extract_reply(resp).unwrap(), "");

        let resp: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(extract_reply(resp).is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_request() {
        let client = OpenAiClient::new("http://127.0.0.1:9/v1/", Some("  ".to_string()), Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:9/v1");
        let err = client.complete("gpt-4o", "sys", &[]).await.unwrap_err();
        assert!(err.to_string().contains("API_KEY"));
    }
}
