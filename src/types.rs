// =============================================================================
// Shared types used across the SMC scanner engine
// =============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Chart timeframe of a candle series. The scanner analyses a fixed set of
/// intraday timeframes per instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
        }
    }

    /// Bar interval of this timeframe.
    pub fn interval(&self) -> Duration {
        match self {
            Timeframe::M5 => Duration::from_secs(300),
            Timeframe::M15 => Duration::from_secs(900),
            Timeframe::M30 => Duration::from_secs(1800),
            Timeframe::H1 => Duration::from_secs(3600),
            Timeframe::H2 => Duration::from_secs(7200),
            Timeframe::H4 => Duration::from_secs(14400),
        }
    }

    /// Parse a wire token such as `"15m"`. Returns `None` for unknown tokens;
    /// config validation turns that into a startup error.
    pub fn from_token(s: &str) -> Option<Timeframe> {
        match s {
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "30m" => Some(Timeframe::M30),
            "1h" => Some(Timeframe::H1),
            "2h" => Some(Timeframe::H2),
            "4h" => Some(Timeframe::H4),
            _ => None,
        }
    }

    /// The full analysis set, ordered from fastest to slowest.
    pub fn all() -> [Timeframe; 6] {
        [
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H2,
            Timeframe::H4,
        ]
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a structural break or imbalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Bullish => write!(f, "Bullish"),
            Direction::Bearish => write!(f, "Bearish"),
        }
    }
}

/// Kind of structural event: continuation break or regime change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Bos,
    Choch,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Bos => write!(f, "BOS"),
            EventKind::Choch => write!(f, "CHOCH"),
        }
    }
}

/// How far beyond the broken level the break travelled. Major means the
/// break price cleared the level by at least 1 %.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Significance {
    Minor,
    Major,
}

/// Kind of a swing point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

/// Current structural interpretation of one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Structure {
    Bullish,
    Bearish,
    BullishChoch,
    BearishChoch,
    Neutral,
}

impl Structure {
    pub fn is_neutral(&self) -> bool {
        matches!(self, Structure::Neutral)
    }

    pub fn is_bullish(&self) -> bool {
        matches!(self, Structure::Bullish | Structure::BullishChoch)
    }

    pub fn is_bearish(&self) -> bool {
        matches!(self, Structure::Bearish | Structure::BearishChoch)
    }
}

impl std::fmt::Display for Structure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Structure::Bullish => write!(f, "Bullish"),
            Structure::Bearish => write!(f, "Bearish"),
            Structure::BullishChoch => write!(f, "Bullish(CHOCH)"),
            Structure::BearishChoch => write!(f, "Bearish(CHOCH)"),
            Structure::Neutral => write!(f, "Neutral"),
        }
    }
}

/// Typed alert categories pushed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    #[serde(rename = "BOS_ENTRY")]
    BosEntry,
    #[serde(rename = "BOS_BREAK")]
    BosBreak,
    #[serde(rename = "FVG_MITIGATED")]
    FvgMitigated,
    #[serde(rename = "TREND_CHANGE")]
    TrendChange,
    #[serde(rename = "PRICE_ALERT")]
    PriceAlert,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::BosEntry => write!(f, "BOS_ENTRY"),
            AlertKind::BosBreak => write!(f, "BOS_BREAK"),
            AlertKind::FvgMitigated => write!(f, "FVG_MITIGATED"),
            AlertKind::TrendChange => write!(f, "TREND_CHANGE"),
            AlertKind::PriceAlert => write!(f, "PRICE_ALERT"),
        }
    }
}

/// Alert delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertPriority {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertPriority::Low => write!(f, "Low"),
            AlertPriority::Medium => write!(f, "Medium"),
            AlertPriority::High => write!(f, "High"),
        }
    }
}
