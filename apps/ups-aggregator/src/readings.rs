use crate::error::ExtractWarning;
use crate::powerpanel::{EquipmentNode, NodeType};
use chrono::{DateTime, Utc};

/// One UPS load sample taken during a poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_id: u32,
    pub display_name: String,
    pub watts: f32,
    pub timestamp: DateTime<Utc>,
}

/// Projects every top-level UPS node into a reading stamped with the tick time.
///
/// Grandchildren are not visited. Output order follows the tree.
pub fn extract_readings(nodes: &[EquipmentNode], timestamp: DateTime<Utc>) -> Vec<Reading> {
    let mut readings = Vec::new();
    for node in nodes {
        match project(node, timestamp) {
            Ok(Some(reading)) => readings.push(reading),
            Ok(None) => {}
            Err(warning) => {
                tracing::warn!(warning = %warning, "dropping malformed UPS node");
            }
        }
    }
    readings
}

fn project(
    node: &EquipmentNode,
    timestamp: DateTime<Utc>,
) -> Result<Option<Reading>, ExtractWarning> {
    match node.node_type {
        NodeType::Ups => {}
        _ => return Ok(None),
    }

    let load = node.node_brief.output_load;
    tracing::info!(
        id = node.id,
        name = %node.name,
        current_load_watts = load.current_watts,
        current_load_percentage = load.percentage,
        "found ups"
    );

    let device_id = u32::try_from(node.id).map_err(|_| ExtractWarning::DeviceIdOutOfRange {
        id: node.id,
        name: node.name.clone(),
    })?;

    Ok(Some(Reading {
        device_id,
        display_name: node.name.clone(),
        watts: load.current_watts,
        timestamp,
    }))
}
