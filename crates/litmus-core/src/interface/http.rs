use super::{ChatExchange, InterfaceClient, Session, TcpProbe};
use crate::config::InterfaceConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub const CHAT_ERROR_SENTINEL: &str = "[Error during chat after retries]";

#[derive(Clone)]
pub struct HttpInterfaceClient {
    pub base_url: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    response: Vec<serde_json::Value>,
}

impl HttpInterfaceClient {
    pub fn new(cfg: &InterfaceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            max_retries: cfg.max_retries.max(1),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            client,
        })
    }

    /// TCP probe against the interface manager's host and port.
    pub fn probe(&self, timeout: Duration) -> anyhow::Result<TcpProbe> {
        let url = reqwest::Url::parse(&self.base_url)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("interface url has no host: {}", self.base_url))?;
        let port = url.port_or_known_default().unwrap_or(80);
        Ok(TcpProbe {
            addr: format!("{}:{}", host, port),
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send_once(&self, chat_id: &str, prompt: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(self.endpoint("chat"))
            .json(&chat_body(chat_id, prompt))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("interface manager returned {}: {}", status, text);
        }
        let reply: ChatReply = resp.json().await?;
        parse_chat_reply(reply)
    }
}

pub(crate) fn chat_body(chat_id: &str, prompt: &str) -> serde_json::Value {
    serde_json::json!({
        "chat_id": chat_id,
        "prompt_list": [prompt],
    })
}

fn parse_chat_reply(reply: ChatReply) -> anyhow::Result<String> {
    let parts: Vec<String> = reply
        .response
        .into_iter()
        .map(|v| match v {
            serde_json::Value::String(s) => s,
            serde_json::Value::Object(mut o) => match o.remove("response") {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => serde_json::Value::Object(o).to_string(),
            },
            other => other.to_string(),
        })
        .collect();
    if parts.is_empty() {
        anyhow::bail!("interface manager returned an empty response list");
    }
    Ok(parts.join("\n"))
}

#[async_trait]
impl InterfaceClient for HttpInterfaceClient {
    async fn chat(&self, chat_id: &str, prompts: &[String]) -> anyhow::Result<Vec<ChatExchange>> {
        let mut out = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let mut response = None;
            for attempt in 1..=self.max_retries {
                match self.send_once(chat_id, prompt).await {
                    Ok(text) => {
                        response = Some(text);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            event = "interface.chat_retry",
                            chat_id = %chat_id,
                            attempt,
                            max_retries = self.max_retries,
                            error = %e,
                            "chat attempt failed"
                        );
                        if attempt < self.max_retries {
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
            out.push(ChatExchange {
                chat_id: chat_id.to_string(),
                prompt: prompt.clone(),
                response: response.unwrap_or_else(|| CHAT_ERROR_SENTINEL.to_string()),
            });
        }
        Ok(out)
    }

    async fn sync_config(&self, cfg: &serde_json::Value) -> anyhow::Result<()> {
        self.client
            .post(self.endpoint("config"))
            .json(cfg)
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!(event = "interface.config_synced", url = %self.base_url);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.client
            .post(self.endpoint("close"))
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!(event = "interface.closed", url = %self.base_url);
        Ok(())
    }
}

#[async_trait]
impl Session for HttpInterfaceClient {
    async fn close(&mut self) -> anyhow::Result<()> {
        InterfaceClient::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(v: serde_json::Value) -> ChatReply {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn body_wraps_single_prompt() {
        let b = chat_body("c1", "hi");
        assert_eq!(b["chat_id"], "c1");
        assert_eq!(b["prompt_list"], serde_json::json!(["hi"]));
    }

    #[test]
    fn reply_parsing() {
        assert_eq!(
            parse_chat_reply(reply(serde_json::json!({"response": ["a", "b"]}))).unwrap(),
            "a\nb"
        );
        assert_eq!(
            parse_chat_reply(reply(serde_json::json!({"response": [{"response": "x"}]}))).unwrap(),
            "x"
        );
        assert!(parse_chat_reply(reply(serde_json::json!({}))).is_err());
    }

    #[test]
    fn probe_targets_manager_host() {
        let mut cfg = InterfaceConfig::default();
        let client = HttpInterfaceClient::new(&cfg).unwrap();
        assert_eq!(client.probe(Duration::from_secs(1)).unwrap().addr, "localhost:8000");

        cfg.url = "https://agents.example.org/".into();
        let client = HttpInterfaceClient::new(&cfg).unwrap();
        assert_eq!(client.probe(Duration::from_secs(1)).unwrap().addr, "agents.example.org:443");
    }

    #[tokio::test]
    async fn unreachable_manager_yields_sentinel() {
        let cfg = InterfaceConfig {
            url: "http://127.0.0.1:9".into(),
            timeout_seconds: 1,
            max_retries: 2,
            retry_delay_ms: 1,
            chat_id: None,
        };
        let client = HttpInterfaceClient::new(&cfg).unwrap();
        let out = client.chat("c", &["hello".to_string()]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].response, CHAT_ERROR_SENTINEL);
        assert_eq!(out[0].prompt, "hello");
    }
}
