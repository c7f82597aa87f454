//! Agent 能力层：调用抽象、同步适配、响应文本提取、Mock

pub mod extract;
pub mod mock;
pub mod traits;

pub use extract::extract_text;
pub use mock::MockAgent;
pub use traits::{AgentCapability, AgentRequest, AgentResponse, BlockingAgent};
