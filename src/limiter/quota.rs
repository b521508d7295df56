use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Who is calling, as far as quotas are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerClass {
    Anonymous,
    Authenticated,
    Admin,
}

impl CallerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallerClass::Anonymous => "anonymous",
            CallerClass::Authenticated => "authenticated",
            CallerClass::Admin => "admin",
        }
    }
}

impl FromStr for CallerClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anonymous" | "anon" => Ok(CallerClass::Anonymous),
            "authenticated" | "auth" | "user" => Ok(CallerClass::Authenticated),
            "admin" => Ok(CallerClass::Admin),
            other => Err(format!("unknown caller class {other:?}")),
        }
    }
}

/// Opaque key a quota is tracked against, plus its class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    pub key: String,
    pub class: CallerClass,
}

impl CallerIdentity {
    pub fn anonymous(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            class: CallerClass::Anonymous,
        }
    }

    pub fn new(key: impl Into<String>, class: CallerClass) -> Self {
        Self {
            key: key.into(),
            class,
        }
    }
}

/// `max_requests` per `window_seconds` for one route class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub route_class: String,
    pub max_requests: u32,
    pub window_seconds: u64,
}

/// A rate written as `N/unit`, e.g. `10/minute` or `5/30s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Rate {
    pub fn for_route(self, route_class: impl Into<String>) -> Quota {
        Quota {
            route_class: route_class.into(),
            max_requests: self.max_requests,
            window_seconds: self.window_seconds,
        }
    }
}

impl FromStr for Rate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, unit) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| "expected N/unit".to_string())?;
        let max_requests: u32 = count
            .trim()
            .parse()
            .map_err(|_| format!("{count:?} is not a request count"))?;
        if max_requests == 0 {
            return Err("request count must be positive".to_string());
        }

        let window_seconds = match unit.trim() {
            "second" | "sec" | "s" => 1,
            "minute" | "min" | "m" => 60,
            "hour" | "h" => 3600,
            "day" | "d" => 86_400,
            secs => secs
                .strip_suffix('s')
                .and_then(|n| n.parse::<u64>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("unknown window {secs:?}"))?,
        };

        Ok(Rate {
            max_requests,
            window_seconds,
        })
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.max_requests, self.window_seconds)
    }
}

/// Immutable quota lookup: `(route, class)` first, then `route`, then the
/// default.
#[derive(Debug, Clone)]
pub struct QuotaTable {
    default: Rate,
    by_route: HashMap<String, Rate>,
    by_route_and_class: HashMap<(String, CallerClass), Rate>,
}

impl QuotaTable {
    pub fn new(default: Rate) -> Self {
        Self {
            default,
            by_route: HashMap::new(),
            by_route_and_class: HashMap::new(),
        }
    }

    pub fn with_route(mut self, route_class: &str, rate: Rate) -> Self {
        self.by_route.insert(route_class.to_string(), rate);
        self
    }

    pub fn with_class(mut self, route_class: &str, class: CallerClass, rate: Rate) -> Self {
        self.by_route_and_class
            .insert((route_class.to_string(), class), rate);
        self
    }

    pub fn resolve(&self, route_class: &str, class: CallerClass) -> Quota {
        let rate = self
            .by_route_and_class
            .get(&(route_class.to_string(), class))
            .or_else(|| self.by_route.get(route_class))
            .copied()
            .unwrap_or(self.default);
        rate.for_route(route_class)
    }
}
