//! Home Assistant MQTT discovery descriptors for the published metrics.
//! <https://www.home-assistant.io/integrations/mqtt/#mqtt-discovery>

use crate::extract::Metric;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub identifiers: String,
    pub manufacturer: String,
    pub name: String,
    #[serde(rename = "sw_version")]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryDescriptor {
    pub state_topic: String,
    #[serde(rename = "unit_of_measurement")]
    pub unit: String,
    pub name: String,
    pub value_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    pub state_class: String,
    pub device: Device,
    pub unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

struct SensorSpec {
    metric: Metric,
    name: &'static str,
    unit: &'static str,
    device_class: Option<&'static str>,
    state_class: &'static str,
    id_suffix: &'static str,
    icon: Option<&'static str>,
}

const SENSORS: [SensorSpec; 5] = [
    SensorSpec {
        metric: Metric::InstantPower,
        name: "Current Generation",
        unit: "kW",
        device_class: Some("power"),
        state_class: "measurement",
        id_suffix: "current",
        icon: None,
    },
    SensorSpec {
        metric: Metric::LifeMeter,
        name: "Lifetime Generated",
        unit: "kWh",
        device_class: Some("energy"),
        state_class: "total_increasing",
        id_suffix: "lifetime",
        icon: None,
    },
    SensorSpec {
        metric: Metric::TreesSaved,
        name: "Trees Saved",
        unit: "trees",
        device_class: None,
        state_class: "total_increasing",
        id_suffix: "trees",
        icon: Some("mdi:pine-tree"),
    },
    SensorSpec {
        metric: Metric::OilOffset,
        name: "GHG Offset",
        unit: "lbs",
        device_class: None,
        state_class: "total_increasing",
        id_suffix: "oil_offset",
        icon: Some("mdi:oil"),
    },
    SensorSpec {
        metric: Metric::Co2Offset,
        name: "Houses Offset",
        unit: "hours",
        device_class: None,
        state_class: "total_increasing",
        id_suffix: "co2_offset",
        icon: Some("mdi:molecule-co2"),
    },
];

/// Lowercase ASCII slug: runs of anything but letters and digits become one '-'.
pub fn slugify(input: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new("[^a-z0-9]+").expect("slug pattern is valid"));
    re.replace_all(&input.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// One descriptor per metric, all reading from `state_topic`.
pub fn descriptors(address: &str, state_topic: &str) -> Vec<DiscoveryDescriptor> {
    let slug = slugify(address);
    let device = Device {
        identifiers: slug.clone(),
        manufacturer: "SolarOS".to_string(),
        name: "SolarOS".to_string(),
        version: "1".to_string(),
    };

    SENSORS
        .iter()
        .map(|s| DiscoveryDescriptor {
            state_topic: state_topic.to_string(),
            unit: s.unit.to_string(),
            name: s.name.to_string(),
            value_template: format!("{{{{ value_json.{} | float }}}}", s.metric.json_field()),
            device_class: s.device_class.map(String::from),
            state_class: s.state_class.to_string(),
            device: device.clone(),
            unique_id: format!("solaros_{}_{}", slug, s.id_suffix),
            icon: s.icon.map(String::from),
        })
        .collect()
}

/// `<prefix>/sensor/<unique_id>/config`
pub fn config_topic(prefix: &str, descriptor: &DiscoveryDescriptor) -> String {
    format!(
        "{}/sensor/{}/config",
        prefix.trim_end_matches('/'),
        descriptor.unique_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("12 Sunny Lane, Springfield"), "12-sunny-lane-springfield");
        assert_eq!(slugify("  --Main St.-- "), "main-st");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_one_descriptor_per_metric() {
        let all = descriptors("1 Main St", "power/powerStats");
        assert_eq!(all.len(), Metric::ALL.len());
        let ids: Vec<_> = all.iter().map(|d| d.unique_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "solaros_1-main-st_current",
                "solaros_1-main-st_lifetime",
                "solaros_1-main-st_trees",
                "solaros_1-main-st_oil_offset",
                "solaros_1-main-st_co2_offset",
            ]
        );
        assert!(all.iter().all(|d| d.state_topic == "power/powerStats"));
    }

    #[test]
    fn test_config_topic() {
        let all = descriptors("1 Main St", "power/powerStats");
        assert_eq!(
            config_topic("homeassistant/", &all[0]),
            "homeassistant/sensor/solaros_1-main-st_current/config"
        );
    }

    #[test]
    fn test_descriptor_json() {
        let all = descriptors("Home", "power/powerStats");
        let power = serde_json::to_value(&all[0]).unwrap();
        assert_eq!(
            power,
            serde_json::json!({
                "state_topic": "power/powerStats",
                "unit_of_measurement": "kW",
                "name": "Current Generation",
                "value_template": "{{ value_json.instant_power | float }}",
                "device_class": "power",
                "state_class": "measurement",
                "device": {
                    "identifiers": "home",
                    "manufacturer": "SolarOS",
                    "name": "SolarOS",
                    "sw_version": "1"
                },
                "unique_id": "solaros_home_current"
            })
        );

        let trees = serde_json::to_value(&all[2]).unwrap();
        assert_eq!(trees["icon"], "mdi:pine-tree");
        assert!(trees.get("device_class").is_none());
    }
}
