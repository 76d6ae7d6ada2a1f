use crate::error::ExtractWarning;
use serde::{Deserialize, Deserializer};

/// PowerPanel management node categories, as the integer codes the appliance reports.
///
/// Only [`NodeType::Ups`] drives collection; every other category is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum NodeType {
    #[default]
    None,
    Root,
    Group,
    DaisyChainPduGroup,
    Ups,
    Pdu,
    Ats,
    Other(i64),
}

impl From<i64> for NodeType {
    fn from(code: i64) -> Self {
        match code {
            0 => NodeType::None,
            1 => NodeType::Root,
            2 => NodeType::Group,
            3 => NodeType::DaisyChainPduGroup,
            4 => NodeType::Ups,
            5 => NodeType::Pdu,
            6 => NodeType::Ats,
            other => NodeType::Other(other),
        }
    }
}

/// Top-level nodes of a management tree response.
///
/// Nodes that fail to decode are left out of `children` and reported in
/// `skipped`, so one bad entry never hides its siblings.
#[derive(Debug, Clone, Default)]
pub struct ManagementTree {
    pub children: Vec<EquipmentNode>,
    pub skipped: Vec<ExtractWarning>,
}

#[derive(Deserialize)]
struct RawManagementTree {
    #[serde(rename = "childrenNodeList", default, deserialize_with = "null_as_default")]
    children: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EquipmentNode {
    pub id: i64,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub node_type: NodeType,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "nodeBrief", default, deserialize_with = "null_as_default")]
    pub node_brief: NodeBrief,
    // Decoded but never walked: collection only looks at the top level.
    #[serde(rename = "childrenNodeList", default, deserialize_with = "null_as_default")]
    pub children: Vec<EquipmentNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeBrief {
    #[serde(rename = "nodeState", default, deserialize_with = "null_as_default")]
    pub node_state: i64,
    #[serde(rename = "stateDescriptionList", default, deserialize_with = "null_as_default")]
    pub state_descriptions: Vec<String>,
    #[serde(rename = "outputLoad", default, deserialize_with = "null_as_default")]
    pub output_load: OutputLoad,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct OutputLoad {
    #[serde(default, deserialize_with = "null_as_default")]
    pub percentage: i64,
    #[serde(rename = "currentWatts", default, deserialize_with = "null_as_default")]
    pub current_watts: f32,
}

// The appliance sends `null` for fields it has no value for.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn parse_management_tree(body: &[u8]) -> Result<ManagementTree, serde_json::Error> {
    let raw: RawManagementTree = serde_json::from_slice(body)?;
    let mut tree = ManagementTree::default();
    for (index, value) in raw.children.into_iter().enumerate() {
        match serde_json::from_value::<EquipmentNode>(value) {
            Ok(node) => tree.children.push(node),
            Err(err) => {
                let warning = ExtractWarning::MalformedNode {
                    index,
                    reason: err.to_string(),
                };
                tracing::warn!(warning = %warning, "dropping undecodable node");
                tree.skipped.push(warning);
            }
        }
    }
    Ok(tree)
}
