use serde::{Deserialize, Serialize};

use crate::limiter::CallerClass;

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    /// Identity key as the limiter sees it, e.g. `ip:1.2.3.4` or `user:42`.
    pub caller: String,
    pub route_class: String,
    #[serde(default)]
    pub caller_class: Option<CallerClass>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub caller: String,
    pub route_class: String,
}

#[derive(Debug, Deserialize)]
pub struct QuotaQuery {
    pub route_class: String,
    #[serde(default)]
    pub caller_class: Option<CallerClass>,
}
