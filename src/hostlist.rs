//! Expansion of scheduler compact host lists such as `node[01-03,07],gpu5`.

const MAX_HOSTS: usize = 65536;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum HostlistError {
    #[error("unbalanced brackets in host list '{0}'")]
    Unbalanced(String),

    #[error("invalid range '{0}'")]
    InvalidRange(String),

    #[error("host list expands to more than 65536 hosts")]
    TooLarge,
}

/// Expand a compact host list into hostnames, keeping scheduler order.
pub fn expand(compact: &str) -> Result<Vec<String>, HostlistError> {
    let mut hosts = Vec::new();
    for item in split_top_level(compact)? {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        expand_item(item, &mut hosts)?;
    }
    Ok(hosts)
}

fn split_top_level(compact: &str) -> Result<Vec<&str>, HostlistError> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in compact.char_indices() {
        match c {
            '[' => {
                if depth > 0 {
                    return Err(HostlistError::Unbalanced(compact.to_string()));
                }
                depth += 1;
            }
            ']' => {
                if depth == 0 {
                    return Err(HostlistError::Unbalanced(compact.to_string()));
                }
                depth -= 1;
            }
            ',' if depth == 0 => {
                items.push(&compact[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(HostlistError::Unbalanced(compact.to_string()));
    }
    items.push(&compact[start..]);
    Ok(items)
}

fn expand_item(item: &str, out: &mut Vec<String>) -> Result<(), HostlistError> {
    let Some(open) = item.find('[') else {
        push_host(out, item.to_string())?;
        return Ok(());
    };
    let close = item[open..]
        .find(']')
        .map(|offset| open + offset)
        .ok_or_else(|| HostlistError::Unbalanced(item.to_string()))?;

    let prefix = &item[..open];
    let body = &item[open + 1..close];
    let rest = &item[close + 1..];

    let mut tails = Vec::new();
    expand_item_or_empty(rest, &mut tails)?;

    for value in expand_range_body(body)? {
        for tail in &tails {
            push_host(out, format!("{prefix}{value}{tail}"))?;
        }
    }
    Ok(())
}

fn expand_item_or_empty(rest: &str, out: &mut Vec<String>) -> Result<(), HostlistError> {
    if rest.is_empty() {
        out.push(String::new());
        Ok(())
    } else {
        expand_item(rest, out)
    }
}

fn expand_range_body(body: &str) -> Result<Vec<String>, HostlistError> {
    let mut values = Vec::new();
    for part in body.split(',') {
        let invalid = || HostlistError::InvalidRange(part.to_string());
        let (lo, hi) = match part.split_once('-') {
            Some((lo, hi)) => (lo, hi),
            None => (part, part),
        };
        if !is_number(lo) || !is_number(hi) {
            return Err(invalid());
        }
        let width = lo.len();
        let lo_n: u64 = lo.parse().map_err(|_| invalid())?;
        let hi_n: u64 = hi.parse().map_err(|_| invalid())?;
        if lo_n > hi_n || (hi_n - lo_n) as usize >= MAX_HOSTS {
            return Err(invalid());
        }
        for n in lo_n..=hi_n {
            values.push(format!("{n:0width$}"));
        }
    }
    Ok(values)
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn push_host(out: &mut Vec<String>, host: String) -> Result<(), HostlistError> {
    if out.len() >= MAX_HOSTS {
        return Err(HostlistError::TooLarge);
    }
    out.push(host);
    Ok(())
}
