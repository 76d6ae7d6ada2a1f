mod client;
mod session;
mod tree;

pub use client::{parse_login_token, PowerPanelClient};
pub use session::{SessionManager, DEFAULT_TOKEN_VALIDITY};
pub use tree::{EquipmentNode, ManagementTree, NodeBrief, NodeType, OutputLoad};
