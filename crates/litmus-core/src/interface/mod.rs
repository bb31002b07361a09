//! Boundary to the interface manager that drives the target chat application.

pub mod http;
pub mod retry;
pub mod session;
pub mod split;

pub use http::{HttpInterfaceClient, CHAT_ERROR_SENTINEL};
pub use retry::{poll_until, retry_on_internet, ConnectivityProbe, PollOutcome, RetryPolicy, TcpProbe};
pub use session::{Session, SessionManager};
pub use split::{split_message, DEFAULT_MAX_MESSAGE_LEN};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatExchange {
    pub chat_id: String,
    pub prompt: String,
    pub response: String,
}

#[async_trait]
pub trait InterfaceClient: Send + Sync {
    /// Sends each prompt in order within one chat and returns one exchange per prompt.
    async fn chat(&self, chat_id: &str, prompts: &[String]) -> anyhow::Result<Vec<ChatExchange>>;

    async fn sync_config(&self, cfg: &serde_json::Value) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}
