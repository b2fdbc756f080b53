use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A pick extracted upstream from an episode transcript. Read-only for this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub creator_id: Uuid,
    pub ticker: String,
    pub company_name: Option<String>,
    pub direction: Direction,
    pub confidence: Option<f64>,
    pub sentence: Option<String>,
    pub recommendation_date: NaiveDate,
    pub market: Market,
}

impl Recommendation {
    pub fn benchmark(&self) -> Benchmark {
        Benchmark::for_market(self.market)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Hold,
    Sell,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Hold => "HOLD",
            Direction::Sell => "SELL",
        }
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Direction::Buy),
            "HOLD" => Ok(Direction::Hold),
            "SELL" => Ok(Direction::Sell),
            other => anyhow::bail!("unknown recommendation direction: {other}"),
        }
    }
}

/// Listing market of a ticker, fixed when the recommendation is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Germany,
    International,
}

// Exchange suffixes of German venues (Xetra, Frankfurt, Stuttgart, Munich, ...).
const GERMAN_SUFFIXES: [&str; 8] = [".DE", ".F", ".XETRA", ".ETR", ".SG", ".MU", ".BE", ".DU"];

impl Market {
    /// Best-effort classification used by the extraction pipeline when it stores a pick.
    pub fn infer_from_ticker(ticker: &str) -> Self {
        let t = ticker.trim().to_ascii_uppercase();
        if t.starts_with("XETR:") || t.starts_with("FWB:") {
            return Market::Germany;
        }
        if GERMAN_SUFFIXES.iter().any(|s| t.ends_with(s)) {
            return Market::Germany;
        }
        Market::International
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Market::Germany => "germany",
            Market::International => "international",
        }
    }
}

impl FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "germany" => Ok(Market::Germany),
            "international" => Ok(Market::International),
            other => anyhow::bail!("unknown market: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Benchmark {
    Dax,
    Sp500,
}

impl Benchmark {
    pub fn for_market(market: Market) -> Self {
        match market {
            Market::Germany => Benchmark::Dax,
            Market::International => Benchmark::Sp500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Benchmark::Dax => "dax",
            Benchmark::Sp500 => "sp500",
        }
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Benchmark {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "dax" => Ok(Benchmark::Dax),
            "sp500" => Ok(Benchmark::Sp500),
            other => anyhow::bail!("unknown benchmark: {other}"),
        }
    }
}

/// Normalizes a ticker to the uppercase symbol the provider expects.
/// Returns `None` for symbols no provider could know.
pub fn normalize_ticker(ticker: &str) -> Option<String> {
    let t = ticker.trim().to_ascii_uppercase();
    if t.is_empty() || t.len() > 20 {
        return None;
    }
    let valid = t
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'));
    valid.then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn german_listings_map_to_dax() {
        assert_eq!(Market::infer_from_ticker("sap.de"), Market::Germany);
        assert_eq!(Market::infer_from_ticker("XETR:SIE"), Market::Germany);
        assert_eq!(Market::infer_from_ticker("AAPL"), Market::International);
        assert_eq!(Benchmark::for_market(Market::Germany), Benchmark::Dax);
        assert_eq!(Benchmark::for_market(Market::International), Benchmark::Sp500);
    }

    #[test]
    fn normalizes_and_rejects_tickers() {
        assert_eq!(normalize_ticker(" msft "), Some("MSFT".to_string()));
        assert_eq!(normalize_ticker("BRK.B"), Some("BRK.B".to_string()));
        assert_eq!(normalize_ticker(""), None);
        assert_eq!(normalize_ticker("NOT A TICKER"), None);
        assert_eq!(normalize_ticker("ABCDEFGHIJKLMNOPQRSTU"), None);
    }

    #[test]
    fn direction_round_trips_through_db_text() {
        for d in [Direction::Buy, Direction::Hold, Direction::Sell] {
            assert_eq!(d.as_str().parse::<Direction>().unwrap(), d);
        }
        assert!("STRONG_BUY".parse::<Direction>().is_err());
    }
}
