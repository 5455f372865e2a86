use serde::{Deserialize, Serialize};

/// Remote console address of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RconEndpoint {
    /// Instance name
    pub map: String,
    pub ip: String,
    /// Kept as a string to match existing config files
    pub port: String,
    #[serde(skip_serializing)]
    pub pass: String,
}

impl RconEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}
