use std::str::FromStr;

use crate::errors::SelectError;

/// Which allocated nodes get a tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodePolicy {
    #[default]
    First,
    Last,
    All,
}

impl FromStr for NodePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(NodePolicy::First),
            "last" => Ok(NodePolicy::Last),
            "all" => Ok(NodePolicy::All),
            other => Err(format!("unknown node policy '{other}' (first|last|all)")),
        }
    }
}

impl NodePolicy {
    pub fn select<'a>(&self, nodes: &'a [String]) -> Result<Vec<&'a str>, SelectError> {
        match self {
            NodePolicy::First => select_target(nodes).map(|node| vec![node]),
            NodePolicy::Last => nodes
                .last()
                .map(|node| vec![node.as_str()])
                .ok_or(SelectError::EmptyAllocation),
            NodePolicy::All if nodes.is_empty() => Err(SelectError::EmptyAllocation),
            NodePolicy::All => Ok(nodes.iter().map(String::as_str).collect()),
        }
    }
}

/// The tunnel endpoint: the first node of the allocation.
pub fn select_target(nodes: &[String]) -> Result<&str, SelectError> {
    nodes
        .first()
        .map(String::as_str)
        .ok_or(SelectError::EmptyAllocation)
}
