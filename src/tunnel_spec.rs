use std::fmt;

use crate::errors::OptionError;

/// One `submit:exec` forwarding pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub submit_port: u16,
    pub exec_port: u16,
}

impl PortPair {
    /// Forwarding directive understood by the tunnel helper.
    pub fn directive(&self) -> String {
        format!("{}:{}", self.submit_port, self.exec_port)
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.submit_port, self.exec_port)
    }
}

/// Ports requested with `--tunnel`, in the order given. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pairs: Vec<PortPair>,
}

impl TunnelSpec {
    pub fn pairs(&self) -> &[PortPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Parse a `--tunnel` value: `SUBMIT:EXEC[,SUBMIT:EXEC...]`.
pub fn parse_tunnel_option(value: Option<&str>) -> Result<TunnelSpec, OptionError> {
    let value = value.ok_or_else(|| OptionError::InvalidFormat(String::new()))?;
    let invalid = || OptionError::InvalidFormat(value.to_string());

    let mut pairs = Vec::new();
    for entry in value.split(',') {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() != 2 {
            return Err(invalid());
        }
        let submit_port = parse_port(parts[0]).ok_or_else(invalid)?;
        let exec_port = parse_port(parts[1]).ok_or_else(invalid)?;
        pairs.push(PortPair {
            submit_port,
            exec_port,
        });
    }

    Ok(TunnelSpec { pairs })
}

fn parse_port(token: &str) -> Option<u16> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse::<u16>().ok().filter(|port| *port != 0)
}
