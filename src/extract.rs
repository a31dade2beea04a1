//! Pattern-based extraction of telemetry values from portal markup.
//!
//! Every function here is pure: absent markers yield an empty string (or
//! `None` for script variables) and the caller decides what a gap means.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// The five values scraped from the data resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    InstantPower,
    LifeMeter,
    TreesSaved,
    OilOffset,
    Co2Offset,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::InstantPower,
        Metric::LifeMeter,
        Metric::TreesSaved,
        Metric::OilOffset,
        Metric::Co2Offset,
    ];

    /// Token that marks the element holding the value.
    pub fn marker(self) -> &'static str {
        match self {
            Metric::InstantPower => "instantValue",
            Metric::LifeMeter => "lifetimeMeter",
            Metric::TreesSaved => "benefitValue1",
            Metric::OilOffset => "benefitValue2",
            Metric::Co2Offset => "benefitValue3",
        }
    }

    /// Tag name closing the marked block.
    fn terminator(self) -> &'static str {
        match self {
            Metric::LifeMeter => "div",
            _ => "span",
        }
    }

    /// Key of the value in the published Reading JSON.
    pub fn json_field(self) -> &'static str {
        match self {
            Metric::InstantPower => "instant_power",
            Metric::LifeMeter => "life_meter",
            Metric::TreesSaved => "trees_saved",
            Metric::OilOffset => "oil_offset",
            Metric::Co2Offset => "co2_offset",
        }
    }

    fn block_pattern(self) -> &'static Regex {
        static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            Metric::ALL
                .iter()
                .map(|m| {
                    Regex::new(&format!(
                        "{}(.*?){}",
                        regex::escape(m.marker()),
                        m.terminator()
                    ))
                    .expect("metric pattern is valid")
                })
                .collect()
        });
        &patterns[self as usize]
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_field())
    }
}

fn inner_text_pattern() -> &'static Regex {
    static INNER: OnceLock<Regex> = OnceLock::new();
    INNER.get_or_init(|| Regex::new(">(.*?)<").expect("inner text pattern is valid"))
}

/// Extract one metric from raw markup.
///
/// Finds the marker, takes the text of the nearest enclosed tag and drops
/// thousands separators. An "Offline" instantaneous power reads as "0".
pub fn extract(body: &str, metric: Metric) -> String {
    let Some(block) = metric.block_pattern().find(body) else {
        return String::new();
    };
    let Some(inner) = inner_text_pattern()
        .captures(block.as_str())
        .and_then(|c| c.get(1))
    else {
        return String::new();
    };
    let value = inner.as_str().replace(',', "");
    if metric == Metric::InstantPower && value == "Offline" {
        return "0".to_string();
    }
    value
}

/// Text between `var <name> =` and the next `;`, trimmed.
fn script_statement<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let declaration = format!("var {name} =");
    let (_, rest) = body.split_once(&declaration)?;
    let statement = rest.split(';').next().unwrap_or(rest);
    Some(statement.trim())
}

/// Value of a script variable assigned a quoted string literal.
pub fn script_string(body: &str, name: &str) -> Option<String> {
    let value = script_statement(body, name)?.trim_matches('"');
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}

/// Key and value of a script variable assigned a one-entry object literal.
pub fn script_pair(body: &str, name: &str) -> Option<(String, String)> {
    let literal = script_statement(body, name)?
        .trim_matches(|c| c == '{' || c == '}')
        .replace('"', "");
    let (key, value) = literal.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}
